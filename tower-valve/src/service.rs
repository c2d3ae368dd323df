use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use http::Request;
use http::Response;
use tower::BoxError;
use tower::Service;

use valve_limit::KeyResolver;
use valve_limit::Limiter;

use crate::error::ValveError;
use crate::headers;
use crate::layer::DEFAULT_STAGE;
use crate::metrics::Instruments;

/// The service produced by [`crate::RateLimitLayer`].
///
/// Every admitted response carries `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
/// `X-RateLimit-Reset`. Rejections are returned as [`ValveError::RateLimited`].
#[derive(Debug)]
pub struct RateLimitService<S, K, L>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    resolver: Arc<K>,
    stage: &'static str,
    instruments: Instruments,
}

impl<S, K, L> Clone for RateLimitService<S, K, L>
where
    S: Clone,
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            resolver: Arc::clone(&self.resolver),
            stage: self.stage,
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, K, L> RateLimitService<S, K, L>
where
    L: ?Sized,
{
    pub fn new(inner: S, limiter: Arc<L>, resolver: Arc<K>) -> Self {
        Self {
            inner,
            limiter,
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

impl<S, K, L, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S, K, L>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    K: KeyResolver<Request<ReqBody>>,
    L: Limiter + ?Sized + 'static,
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
        // The ready service is the one we take; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let key = self.resolver.resolve(&req);
        let limiter = Arc::clone(&self.limiter);
        let stage = self.stage;
        let instruments = self.instruments.clone();

        Box::pin(async move {
            let Some(key) = key else {
                return inner.call(req).await.map_err(Into::<BoxError>::into);
            };

            let decision = limiter.allow(&key).await.map_err(ValveError::from)?;
            if !decision.allowed {
                instruments.rejected(stage);
                tracing::debug!(stage, key = %key, retry_after = ?decision.reset_in, "rate limited");
                return Err(ValveError::rate_limited(&decision).into());
            }
            instruments.admitted(stage);

            let mut response = inner.call(req).await.map_err(Into::<BoxError>::into)?;
            headers::insert_decision(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}
