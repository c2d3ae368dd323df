use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::AtomicStore;
use crate::Decision;
use crate::FixedWindowArgs;
use crate::Limiter;
use crate::Namespace;
use crate::Result;
use crate::WallClock;

pub(crate) const DEFAULT_PREFIX: &str = "rl:fixed";

/// A Fixed Window counter.
///
/// Every call within a window increments the window's counter, rejected or not, and
/// the counter expires at the window boundary. Cheaper than [`crate::SlidingWindow`],
/// but a client can fit two full windows' worth of requests around a boundary.
#[derive(Debug)]
pub struct FixedWindow<S>
where
    S: ?Sized,
{
    store: Arc<S>,
    namespace: Namespace,
    limit: u64,
    window_secs: u64,
    clock: WallClock,
}

impl<S> FixedWindow<S>
where
    S: AtomicStore + ?Sized,
{
    pub fn new(store: Arc<S>, limit: NonZeroU64, window: Duration) -> Self {
        Self {
            store,
            namespace: Namespace::new(DEFAULT_PREFIX),
            limit: limit.get(),
            window_secs: window.as_secs().max(1),
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
            return Ok(Decision::unchecked(self.limit));
        };
        let now = self.clock.now_secs();
        let window_id = now / self.window_secs;
        let window_key = format!("{base}:{window_id}");

        let args = FixedWindowArgs {
            limit: self.limit,
            expire_secs: self.window_secs - now % self.window_secs,
        };
        let reply = self.store.fixed_window(&window_key, args).await?;

        tracing::debug!(
            key = %window_key,
            admitted = reply.admitted,
            remaining = reply.remaining,
            "fixed window"
        );
        Ok(Decision {
            allowed: reply.admitted,
            limit: self.limit,
            remaining: reply.remaining,
            reset_in: Duration::from_secs(reply.reset_secs),
        })
    }
}

impl<S> Limiter for FixedWindow<S>
where
    S: AtomicStore + ?Sized,
{
    fn allow<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(self.check(key))
    }

    fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use quanta::Clock;

    use super::*;
    use crate::MemoryStore;

    const EPOCH: u64 = 1_700_000_000 - 1_700_000_000 % 60;

    fn limiter(limit: u64) -> (FixedWindow<MemoryStore>, Arc<quanta::Mock>, Arc<MemoryStore>) {
        let (clock, mock) = Clock::mock();
        let store = Arc::new(MemoryStore::new());
        let rl = FixedWindow::new(
            store.clone(),
            NonZeroU64::new(limit).unwrap(),
            Duration::from_secs(60),
        )
        .with_prefix("rl:fixed:test")
        .with_clock(WallClock::with_clock(clock, Duration::from_secs(EPOCH)));
        (rl, mock, store)
    }

    #[tokio::test]
    async fn it_rejects_past_the_limit_until_the_next_window() {
        tokio::time::pause();
        let (rl, mock, _) = limiter(3);
        mock.increment(Duration::from_secs(20));

        let remaining: Vec<u64> = [
            rl.allow("alice").await.unwrap(),
            rl.allow("alice").await.unwrap(),
            rl.allow("alice").await.unwrap(),
        ]
        .iter()
        .map(|d| {
            assert!(d.allowed);
            d.remaining
        })
        .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let rejected = rl.allow("alice").await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.reset_in, Duration::from_secs(40));

        // A new window id is a new counter
        mock.increment(Duration::from_secs(40));
        let decision = rl.allow("alice").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn rejected_calls_still_count() {
        let (rl, _, store) = limiter(1);
        for _ in 0..4 {
            rl.allow("alice").await.unwrap();
        }
        let window_id = EPOCH / 60;
        assert_eq!(
            store.peek(&format!("rl:fixed:test:alice:{window_id}")).as_deref(),
            Some("4")
        );
    }

    #[tokio::test]
    async fn the_counter_expires_at_the_boundary() {
        tokio::time::pause();
        let (rl, mock, store) = limiter(5);
        mock.increment(Duration::from_secs(50));
        rl.allow("alice").await.unwrap();

        let key = format!("rl:fixed:test:alice:{}", EPOCH / 60);
        assert!(store.peek(&key).is_some());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.peek(&key), None);
    }
}
