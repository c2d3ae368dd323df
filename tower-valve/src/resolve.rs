//! Partition-key resolvers over [`http::Request`].

use std::net::SocketAddr;

use http::Extensions;
use http::Request;
use http::header::HeaderName;

use valve_limit::KeyResolver;

const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// The authenticated owner of a request.
///
/// Inserted as a request extension by the authentication stage and read by
/// [`OwnerId`]. Requests without it are not limited or serialized per owner.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Owner(pub String);

/// Resolves the client address: `X-Real-IP`, then the first `X-Forwarded-For` hop,
/// then the connection's peer address.
///
/// The headers are only trustworthy behind a proxy that sets them.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeerAddr;

impl PeerAddr {
    fn from_headers<B>(request: &Request<B>) -> Option<String> {
        let headers = request.headers();
        if let Some(ip) = headers.get(X_REAL_IP).and_then(|v| v.to_str().ok()) {
            let ip = ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
        headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|hops| hops.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    }

    fn from_connection<B>(request: &Request<B>) -> Option<String> {
        let extensions = request.extensions();
        connect_info(extensions)
            .or_else(|| extensions.get::<SocketAddr>().copied())
            .map(|addr| addr.ip().to_string())
    }
}

#[cfg(feature = "axum")]
fn connect_info(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
}

#[cfg(not(feature = "axum"))]
fn connect_info(_: &Extensions) -> Option<SocketAddr> {
    None
}

impl<B> KeyResolver<Request<B>> for PeerAddr {
    fn resolve(&self, request: &Request<B>) -> Option<String> {
        Self::from_headers(request).or_else(|| Self::from_connection(request))
    }
}

/// Resolves the [`Owner`] extension.
#[derive(Clone, Copy, Debug, Default)]
pub struct OwnerId;

impl<B> KeyResolver<Request<B>> for OwnerId {
    fn resolve(&self, request: &Request<B>) -> Option<String> {
        request
            .extensions()
            .get::<Owner>()
            .map(|owner| owner.0.clone())
            .filter(|id| !id.is_empty())
    }
}
