use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::Acquisition;
use crate::Decision;
use crate::Error;
use crate::Guard;
use crate::Lease;
use crate::Limiter;
use crate::Result;

/// Admits requests when the wrapped limiter or guard cannot reach its store.
///
/// This is the one place where infrastructure failures are absorbed. During a
/// store outage throughput spikes and concurrent mutations for one owner become
/// possible; that is the accepted price of keeping the service available.
/// [`Error::Cancelled`] and configuration errors pass through untouched.
#[derive(Clone, Debug)]
pub struct FailOpen<T> {
    inner: T,
}

impl<T> FailOpen<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<L> Limiter for FailOpen<L>
where
    L: Limiter,
{
    fn allow<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(async move {
            match self.inner.allow(key).await {
                Err(Error::StoreUnavailable(reason)) => {
                    tracing::warn!(key, %reason, "rate limit store unavailable, admitting");
                    Ok(Decision::unchecked(self.inner.limit()))
                }
                other => other,
            }
        })
    }

    fn limit(&self) -> u64 {
        self.inner.limit()
    }
}

impl<G> Guard for FailOpen<G>
where
    G: Guard,
{
    fn acquire<'a>(
        &'a self,
        owner: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Acquisition>> {
        Box::pin(async move {
            match self.inner.acquire(owner, cancel).await {
                Err(Error::StoreUnavailable(reason)) => {
                    tracing::warn!(owner, %reason, "lock store unavailable, proceeding unserialized");
                    Ok(Acquisition::Bypassed)
                }
                other => other,
            }
        })
    }

    fn release<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            match self.inner.release(lease).await {
                Err(Error::StoreUnavailable(reason)) => {
                    tracing::warn!(key = lease.key(), %reason, "lock release failed, leaving it to expire");
                    Ok(false)
                }
                other => other,
            }
        })
    }
}
