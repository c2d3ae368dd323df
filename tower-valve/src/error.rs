use std::time::Duration;

use http::HeaderMap;
use http::HeaderValue;
use http::StatusCode;
use http::header::RETRY_AFTER;

use valve_limit::Decision;

use crate::headers;

/// Errors produced by the Tower Valve middleware stack.
///
/// Services box these as [`tower::BoxError`]; downcast to recover them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValveError {
    /// The request was rejected due to rate limiting.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with the `X-RateLimit-*` and `Retry-After` headers.
    #[error("rate limit exceeded")]
    RateLimited {
        limit: u64,
        remaining: u64,
        /// Time until the quota resets.
        reset: Duration,
        /// The duration to wait before retrying.
        retry_after: Duration,
    },

    /// Another request of the same owner holds the lock.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`.
    #[error("another request in progress")]
    Busy,

    /// The request was cancelled while waiting for the owner's lock.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("request timed out waiting for the owner lock")]
    Timeout,

    /// The process-wide cooldown has not elapsed since the last admitted request.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header.
    #[error("too many requests, try again later")]
    Cooldown { retry_after: Duration },

    /// A store failure that was not absorbed by fail-open.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("admission control unavailable: {0}")]
    Unavailable(String),
}

impl ValveError {
    pub(crate) fn rate_limited(decision: &Decision) -> Self {
        Self::RateLimited {
            limit: decision.limit,
            remaining: decision.remaining,
            reset: decision.reset_in,
            retry_after: decision.reset_in.max(Duration::from_secs(1)),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited { .. } | Self::Busy | Self::Cooldown { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The response headers that go with this rejection.
    pub fn headers(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        match self {
            Self::RateLimited {
                limit,
                remaining,
                reset,
                retry_after,
            } => {
                headers::insert_quota(&mut map, *limit, *remaining, *reset);
                map.insert(RETRY_AFTER, HeaderValue::from(retry_after.as_secs().max(1)));
            }
            Self::Cooldown { retry_after } => {
                map.insert(RETRY_AFTER, HeaderValue::from(retry_after.as_secs().max(1)));
            }
            Self::Busy | Self::Timeout | Self::Unavailable(_) => {}
        }
        map
    }
}

impl From<valve_limit::Error> for ValveError {
    fn from(err: valve_limit::Error) -> Self {
        match err {
            valve_limit::Error::Cancelled => Self::Timeout,
            other => Self::Unavailable(other.to_string()),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ValveError {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status(), self.to_string()).into_response();
        response.headers_mut().extend(self.headers());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::X_RATELIMIT_LIMIT;
    use crate::headers::X_RATELIMIT_REMAINING;
    use crate::headers::X_RATELIMIT_RESET;

    #[test]
    fn rate_limited_carries_quota_headers() {
        let decision = Decision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_in: Duration::from_secs(45),
        };
        let err = ValveError::rate_limited(&decision);
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);

        let headers = err.headers();
        assert_eq!(headers[X_RATELIMIT_LIMIT], "5");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[X_RATELIMIT_RESET], "45");
        assert_eq!(headers[RETRY_AFTER], "45");
    }

    #[test]
    fn retry_after_is_at_least_a_second() {
        let err = ValveError::Cooldown {
            retry_after: Duration::from_millis(20),
        };
        assert_eq!(err.headers()[RETRY_AFTER], "1");
    }

    #[test]
    fn store_errors_map_by_kind() {
        assert_eq!(
            ValveError::from(valve_limit::Error::Cancelled),
            ValveError::Timeout
        );
        let err = ValveError::from(valve_limit::Error::StoreUnavailable("down".to_string()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ValveError::Busy.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(ValveError::Busy.headers().is_empty());
    }
}
