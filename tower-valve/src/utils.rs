use std::sync::Arc;

use tower::ServiceBuilder;
use tower::layer::util::Stack;

use valve_limit::CooldownGate;
use valve_limit::FailOpen;
use valve_limit::Guard;
use valve_limit::Limiter;

use crate::CooldownLayer;
use crate::OwnerId;
use crate::PeerAddr;
use crate::RateLimitLayer;
use crate::SerializeLayer;

/// Service Builder Extension with admission stages for tower::ServiceBuilder.
///
/// Limiters and guards added this way fail open.
pub trait ServiceBuilderExt<L> {
    /// Limit requests per client address.
    fn peer_rate_limit(
        self,
        limiter: Arc<dyn Limiter>,
    ) -> ServiceBuilder<Stack<RateLimitLayer<PeerAddr, dyn Limiter>, L>>;

    /// Limit requests per authenticated owner.
    fn owner_rate_limit(
        self,
        limiter: Arc<dyn Limiter>,
    ) -> ServiceBuilder<Stack<RateLimitLayer<OwnerId, dyn Limiter>, L>>;

    /// Run at most one request per authenticated owner at a time.
    fn serialize_owner(
        self,
        guard: Arc<dyn Guard>,
    ) -> ServiceBuilder<Stack<SerializeLayer<OwnerId, dyn Guard>, L>>;

    /// Admit at most one request per cooldown period.
    fn cooldown(self, gate: Arc<CooldownGate>) -> ServiceBuilder<Stack<CooldownLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn peer_rate_limit(
        self,
        limiter: Arc<dyn Limiter>,
    ) -> ServiceBuilder<Stack<RateLimitLayer<PeerAddr, dyn Limiter>, L>> {
        let limiter: Arc<dyn Limiter> = Arc::new(FailOpen::new(limiter));
        self.layer(RateLimitLayer::new(limiter, PeerAddr).with_stage("peer"))
    }

    fn owner_rate_limit(
        self,
        limiter: Arc<dyn Limiter>,
    ) -> ServiceBuilder<Stack<RateLimitLayer<OwnerId, dyn Limiter>, L>> {
        let limiter: Arc<dyn Limiter> = Arc::new(FailOpen::new(limiter));
        self.layer(RateLimitLayer::new(limiter, OwnerId).with_stage("owner"))
    }

    fn serialize_owner(
        self,
        guard: Arc<dyn Guard>,
    ) -> ServiceBuilder<Stack<SerializeLayer<OwnerId, dyn Guard>, L>> {
        let guard: Arc<dyn Guard> = Arc::new(FailOpen::new(guard));
        self.layer(SerializeLayer::new(guard, OwnerId).with_stage("owner_lock"))
    }

    fn cooldown(self, gate: Arc<CooldownGate>) -> ServiceBuilder<Stack<CooldownLayer, L>> {
        self.layer(CooldownLayer::new(gate))
    }
}
