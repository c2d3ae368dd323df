use std::sync::Arc;

use tower::Layer;

use valve_limit::AtomicStore;
use valve_limit::FailOpen;
use valve_limit::Guard;
use valve_limit::Limiter;
use valve_limit::ValveConfig;

use crate::OwnerId;
use crate::PeerAddr;
use crate::RateLimitLayer;
use crate::RateLimitService;
use crate::SerializeLayer;
use crate::SerializeService;

/// The full admission pipeline, in a fixed order:
///
/// 1. per-peer rate limit, keyed by client address
/// 2. the caller's authentication layer `A`, which inserts [`crate::Owner`]
/// 3. per-owner rate limit
/// 4. per-owner serialization
///
/// Every limiter and the guard are wrapped in [`FailOpen`]: when the store cannot
/// be reached, requests are admitted rather than failed.
pub struct AdmissionLayer<A> {
    peer: Arc<dyn Limiter>,
    auth: A,
    owner: Arc<dyn Limiter>,
    guard: Arc<dyn Guard>,
}

impl<A: Clone> Clone for AdmissionLayer<A> {
    fn clone(&self) -> Self {
        Self {
            peer: Arc::clone(&self.peer),
            auth: self.auth.clone(),
            owner: Arc::clone(&self.owner),
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<A> std::fmt::Debug for AdmissionLayer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionLayer")
            .field("peer", &self.peer)
            .field("owner", &self.owner)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl<A> AdmissionLayer<A> {
    pub fn new(
        peer: Arc<dyn Limiter>,
        auth: A,
        owner: Arc<dyn Limiter>,
        guard: Arc<dyn Guard>,
    ) -> Self {
        Self {
            peer: Arc::new(FailOpen::new(peer)),
            auth,
            owner: Arc::new(FailOpen::new(owner)),
            guard: Arc::new(FailOpen::new(guard)),
        }
    }

    /// Build every stage from `config` over one shared store.
    ///
    /// # Errors
    ///
    /// Returns [`valve_limit::Error::Config`] if a limiter or the guard is misconfigured.
    pub fn from_config<S>(
        config: &ValveConfig,
        store: Arc<S>,
        auth: A,
    ) -> Result<Self, valve_limit::Error>
    where
        S: AtomicStore + ?Sized + 'static,
    {
        let peer = config.peer_limit.build(Arc::clone(&store))?;
        let owner = config.owner_limit.build(Arc::clone(&store))?;
        let guard: Arc<dyn Guard> = Arc::new(config.guard.build(store)?);
        Ok(Self::new(peer, auth, owner, guard))
    }
}

/// Per-owner limiting and serialization around the inner service.
pub type OwnerStages<S> =
    RateLimitService<SerializeService<S, OwnerId, dyn Guard>, OwnerId, dyn Limiter>;

impl<A, S> Layer<S> for AdmissionLayer<A>
where
    A: Layer<OwnerStages<S>>,
{
    type Service = RateLimitService<A::Service, PeerAddr, dyn Limiter>;

    fn layer(&self, inner: S) -> Self::Service {
        let serialized = SerializeLayer::new(Arc::clone(&self.guard), OwnerId)
            .with_stage("owner_lock")
            .layer(inner);
        let owner_limited = RateLimitLayer::new(Arc::clone(&self.owner), OwnerId)
            .with_stage("owner")
            .layer(serialized);
        let authenticated = self.auth.layer(owner_limited);
        RateLimitLayer::new(Arc::clone(&self.peer), PeerAddr)
            .with_stage("peer")
            .layer(authenticated)
    }
}
