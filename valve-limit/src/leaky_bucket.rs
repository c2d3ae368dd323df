use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::AtomicStore;
use crate::Decision;
use crate::LeakyBucketArgs;
use crate::Limiter;
use crate::Namespace;
use crate::Result;
use crate::WallClock;
use crate::secs_to_cover;

pub(crate) const DEFAULT_PREFIX: &str = "rl:leaky";

/// A Leaky Bucket used as a meter.
///
/// Every admitted request adds one unit to the bucket, which drains at `leak_rate`
/// units per second. A request is admitted only if it fits, so the level never
/// exceeds `capacity` and the sustained rate is smoothed to `leak_rate`.
#[derive(Debug)]
pub struct LeakyBucket<S>
where
    S: ?Sized,
{
    store: Arc<S>,
    namespace: Namespace,
    capacity: u64,
    leak_rate: f64,
    clock: WallClock,
}

impl<S> LeakyBucket<S>
where
    S: AtomicStore + ?Sized,
{
    pub fn new(store: Arc<S>, capacity: NonZeroU64, leak_rate: f64) -> Self {
        Self {
            store,
            namespace: Namespace::new(DEFAULT_PREFIX),
            capacity: capacity.get(),
            leak_rate: leak_rate.max(0.0),
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
        let level_key = format!("{base}:level");
        let ts_key = format!("{base}:ts");

        let args = LeakyBucketArgs {
            now: self.clock.now().as_secs_f64(),
            leak_rate: self.leak_rate,
            capacity: self.capacity,
        };
        let reply = self.store.leaky_bucket(&level_key, &ts_key, args).await?;

        let capacity = self.capacity as f64;
        let reset_secs = if reply.admitted {
            secs_to_cover(reply.level, self.leak_rate)
        } else {
            secs_to_cover(reply.level + 1.0 - capacity, self.leak_rate).max(1)
        };

        tracing::debug!(key = %base, admitted = reply.admitted, level = reply.level, "leaky bucket");
        Ok(Decision {
            allowed: reply.admitted,
            limit: self.capacity,
            remaining: (capacity - reply.level).max(0.0).floor() as u64,
            reset_in: Duration::from_secs(reset_secs),
        })
    }
}

impl<S> Limiter for LeakyBucket<S>
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
