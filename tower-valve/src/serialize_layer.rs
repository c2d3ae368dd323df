use std::sync::Arc;

use tower::Layer;
use valve_limit::Guard;

use crate::serialize_service::SerializeService;

pub(crate) const DEFAULT_STAGE: &str = "serialize";

/// Serializes requests of the same owner with a [`Guard`].
///
/// The owner's lock is held for the duration of the inner call and released when
/// the response completes, fails, or is dropped. A `CancellationToken` request
/// extension, if present, aborts a waiting acquisition.
#[derive(Debug)]
pub struct SerializeLayer<K, G>
where
    G: ?Sized,
{
    guard: Arc<G>,
    resolver: Arc<K>,
    stage: &'static str,
}

impl<K, G> Clone for SerializeLayer<K, G>
where
    G: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            guard: Arc::clone(&self.guard),
            resolver: Arc::clone(&self.resolver),
            stage: self.stage,
        }
    }
}

impl<K, G> SerializeLayer<K, G>
where
    G: Guard + ?Sized,
{
    pub fn new(guard: Arc<G>, resolver: K) -> Self {
        Self {
            guard,
            resolver: Arc::new(resolver),
            stage: DEFAULT_STAGE,
        }
    }

    pub fn with_stage(mut self, stage: &'static str) -> Self {
        self.stage = stage;
        self
    }
}

impl<K, G, S> Layer<S> for SerializeLayer<K, G>
where
    G: ?Sized,
{
    type Service = SerializeService<S, K, G>;

    fn layer(&self, service: S) -> Self::Service {
        SerializeService::new(service, self.guard.clone(), self.resolver.clone())
            .with_stage(self.stage)
    }
}
