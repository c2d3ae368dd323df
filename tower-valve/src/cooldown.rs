use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use tower::BoxError;
use tower::Layer;
use tower::Service;

use valve_limit::CooldownGate;
use valve_limit::Reason;

use crate::error::ValveError;
use crate::metrics::Instruments;

const STAGE: &str = "cooldown";

/// Admits at most one request per cooldown period across every service sharing
/// the gate. State is local to this process.
#[derive(Clone, Debug)]
pub struct CooldownLayer {
    gate: Arc<CooldownGate>,
}

impl CooldownLayer {
    pub fn new(gate: Arc<CooldownGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for CooldownLayer {
    type Service = CooldownService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CooldownService {
            inner,
            gate: Arc::clone(&self.gate),
            instruments: Instruments::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CooldownService<S> {
    inner: S,
    gate: Arc<CooldownGate>,
    instruments: Instruments,
}

impl<S, Req> Service<Req> for CooldownService<S>
where
    S: Service<Req>,
    S::Response: Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        if let ControlFlow::Break(Reason::Overloaded { retry_after }) = self.gate.try_enter() {
            self.instruments.rejected(STAGE);
            return Box::pin(std::future::ready(Err(
                ValveError::Cooldown { retry_after }.into()
            )));
        }
        self.instruments.admitted(STAGE);

        let fut = self.inner.call(req);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}
