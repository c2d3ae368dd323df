use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::AtomicStore;
use crate::Decision;
use crate::Limiter;
use crate::Namespace;
use crate::Result;
use crate::TokenBucketArgs;
use crate::WallClock;
use crate::secs_to_cover;

pub(crate) const DEFAULT_PREFIX: &str = "rl:token";

/// A Token Bucket.
///
/// A bucket starts full at `capacity` tokens and refills continuously at
/// `refill_rate` tokens per second. Each admitted request takes one token, which
/// allows bursts of up to `capacity` after an idle period.
///
/// The token count and the time of the last refill are kept under
/// `<prefix>:<id>:tokens` and `<prefix>:<id>:ts`.
#[derive(Debug)]
pub struct TokenBucket<S>
where
    S: ?Sized,
{
    store: Arc<S>,
    namespace: Namespace,
    capacity: u64,
    refill_rate: f64,
    clock: WallClock,
}

impl<S> TokenBucket<S>
where
    S: AtomicStore + ?Sized,
{
    pub fn new(store: Arc<S>, capacity: NonZeroU64, refill_rate: f64) -> Self {
        Self {
            store,
            namespace: Namespace::new(DEFAULT_PREFIX),
            capacity: capacity.get(),
            refill_rate: refill_rate.max(0.0),
            clock: WallClock::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.namespace = Namespace::new(prefix);
        self
    }

    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    async fn check(&self, key: &str) -> Result<Decision> {
        let Some(base) = self.namespace.key(key) else {
            return Ok(Decision::unchecked(self.limit()));
        };
        let tokens_key = format!("{base}:tokens");
        let ts_key = format!("{base}:ts");

        let args = TokenBucketArgs {
            capacity: self.capacity,
            now: self.clock.now().as_secs_f64(),
            refill_rate: self.refill_rate,
        };
        let reply = self.store.token_bucket(&tokens_key, &ts_key, args).await?;

        let reset_secs = if reply.admitted {
            secs_to_cover(self.capacity as f64 - reply.level, self.refill_rate)
        } else {
            secs_to_cover(1.0 - reply.level, self.refill_rate).max(1)
        };

        tracing::debug!(key = %base, admitted = reply.admitted, tokens = reply.level, "token bucket");
        Ok(Decision {
            allowed: reply.admitted,
            limit: self.capacity,
            remaining: reply.level.max(0.0).floor() as u64,
            reset_in: Duration::from_secs(reset_secs),
        })
    }
}

impl<S> Limiter for TokenBucket<S>
where
    S: AtomicStore + ?Sized,
{
    fn allow<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(self.check(key))
    }

    fn limit(&self) -> u64 {
        self.capacity
    }
}
