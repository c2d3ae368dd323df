use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use http::Request;
use http::Response;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tower::Service;

use valve_limit::Acquisition;
use valve_limit::Guard;
use valve_limit::KeyResolver;
use valve_limit::Lease;

use crate::error::ValveError;
use crate::metrics::Instruments;
use crate::serialize_layer::DEFAULT_STAGE;

/// The service produced by [`crate::SerializeLayer`].
#[derive(Debug)]
pub struct SerializeService<S, K, G>
where
    G: ?Sized,
{
    inner: S,
    guard: Arc<G>,
    resolver: Arc<K>,
    stage: &'static str,
    instruments: Instruments,
}

impl<S, K, G> Clone for SerializeService<S, K, G>
where
    S: Clone,
    G: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            guard: Arc::clone(&self.guard),
            resolver: Arc::clone(&self.resolver),
            stage: self.stage,
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, K, G> SerializeService<S, K, G>
where
    G: ?Sized,
{
    pub fn new(inner: S, guard: Arc<G>, resolver: Arc<K>) -> Self {
        Self {
            inner,
            guard,
            resolver,
            stage: DEFAULT_STAGE,
            instruments: Instruments::new(),
        }
    }

    pub fn with_stage(mut self, stage: &'static str) -> Self {
        self.stage = stage;
        self
    }
}

/// A lease that is given back when dropped, even if the request future is
/// abandoned half way.
struct HeldLease<G>
where
    G: Guard + ?Sized + 'static,
{
    guard: Arc<G>,
    lease: Option<Lease>,
}

impl<G> HeldLease<G>
where
    G: Guard + ?Sized + 'static,
{
    async fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            release(self.guard.as_ref(), &lease).await;
        }
    }
}

impl<G> Drop for HeldLease<G>
where
    G: Guard + ?Sized + 'static,
{
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                let guard = Arc::clone(&self.guard);
                handle.spawn(async move { release(guard.as_ref(), &lease).await });
            }
            Err(_) => {
                tracing::warn!(key = lease.key(), "no runtime to release lock, leaving it to expire");
            }
        }
    }
}

async fn release<G>(guard: &G, lease: &Lease)
where
    G: Guard + ?Sized,
{
    if let Err(err) = guard.release(lease).await {
        tracing::error!(key = lease.key(), %err, "failed to release lock");
    }
}

impl<S, K, G, ReqBody, ResBody> Service<Request<ReqBody>> for SerializeService<S, K, G>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    K: KeyResolver<Request<ReqBody>>,
    G: Guard + ?Sized + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let owner = self.resolver.resolve(&req);
        let cancel = req
            .extensions()
            .get::<CancellationToken>()
            .cloned()
            .unwrap_or_default();
        let guard = Arc::clone(&self.guard);
        let stage = self.stage;
        let instruments = self.instruments.clone();

        Box::pin(async move {
            let Some(owner) = owner else {
                return inner.call(req).await.map_err(Into::<BoxError>::into);
            };

            let held = match guard.acquire(&owner, &cancel).await {
                Ok(Acquisition::Acquired(lease)) => Some(HeldLease {
                    guard: Arc::clone(&guard),
                    lease: Some(lease),
                }),
                Ok(Acquisition::Bypassed) => None,
                Ok(Acquisition::Busy) => {
                    instruments.lock_busy(stage);
                    tracing::debug!(stage, owner = %owner, "owner busy");
                    return Err(ValveError::Busy.into());
                }
                Err(err) => return Err(ValveError::from(err).into()),
            };
            instruments.admitted(stage);

            let result = inner.call(req).await.map_err(Into::<BoxError>::into);
            if let Some(held) = held {
                held.release().await;
            }
            result
        })
    }
}
