use std::sync::Arc;

use tower::Layer;
use valve_limit::Limiter;

use crate::service::RateLimitService;

pub(crate) const DEFAULT_STAGE: &str = "rate_limit";

/// Applies a [`Limiter`] to requests, partitioned by the key `resolver` derives.
///
/// Requests for which the resolver yields no key pass through unlimited.
#[derive(Debug)]
pub struct RateLimitLayer<K, L>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    resolver: Arc<K>,
    stage: &'static str,
}

impl<K, L> Clone for RateLimitLayer<K, L>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            resolver: Arc::clone(&self.resolver),
            stage: self.stage,
        }
    }
}

impl<K, L> RateLimitLayer<K, L>
where
    L: Limiter + ?Sized,
{
    /// Create a RateLimitLayer
    pub fn new(limiter: Arc<L>, resolver: K) -> Self {
        RateLimitLayer {
            limiter,
            resolver: Arc::new(resolver),
            stage: DEFAULT_STAGE,
        }
    }

    /// Name this stage in logs and metrics (e.g. `"peer"`, `"owner"`).
    pub fn with_stage(mut self, stage: &'static str) -> Self {
        self.stage = stage;
        self
    }
}

impl<K, L, S> Layer<S> for RateLimitLayer<K, L>
where
    L: ?Sized,
{
    type Service = RateLimitService<S, K, L>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService::new(service, self.limiter.clone(), self.resolver.clone())
            .with_stage(self.stage)
    }
}
