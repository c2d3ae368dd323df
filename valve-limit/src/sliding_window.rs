use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::AtomicStore;
use crate::Decision;
use crate::Limiter;
use crate::Namespace;
use crate::Result;
use crate::SlidingWindowArgs;
use crate::WallClock;

pub(crate) const DEFAULT_PREFIX: &str = "rl:sliding";

/// A Sliding Window Counter implementation.
///
/// It maintains a count for the current fixed window and the previous one, each
/// in its own store key (`<prefix>:<id>:<window number>`).
/// The effective count is: (previous_count * %_of_window_left) + current_count.
///
/// Rejected requests are not counted.
#[derive(Debug)]
pub struct SlidingWindow<S>
where
    S: ?Sized,
{
    store: Arc<S>,
    namespace: Namespace,
    limit: u64,
    window_secs: u64,
    clock: WallClock,
}

impl<S> SlidingWindow<S>
where
    S: AtomicStore + ?Sized,
{
    /// Windows are whole seconds; anything shorter than a second is rounded up.
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

    /// The current bucket must still exist when it becomes the previous one.
    fn bucket_expiry(&self) -> u64 {
        self.window_secs * 2
    }

    async fn check(&self, key: &str) -> Result<Decision> {
        let Some(base) = self.namespace.key(key) else {
            return Ok(Decision::unchecked(self.limit));
        };
        let now = self.clock.now_secs();
        let window_id = now / self.window_secs;
        let elapsed = now % self.window_secs;
        let weight = 1.0 - elapsed as f64 / self.window_secs as f64;

        let prev_key = format!("{base}:{}", window_id.saturating_sub(1));
        let curr_key = format!("{base}:{window_id}");

        let args = SlidingWindowArgs {
            weight,
            limit: self.limit,
            retry_after_secs: self.window_secs - elapsed,
            expire_secs: self.bucket_expiry(),
        };
        let reply = self.store.sliding_window(&prev_key, &curr_key, args).await?;

        tracing::debug!(
            key = %curr_key,
            admitted = reply.admitted,
            remaining = reply.remaining,
            "sliding window"
        );
        Ok(Decision {
            allowed: reply.admitted,
            limit: self.limit,
            remaining: reply.remaining,
            reset_in: Duration::from_secs(reply.reset_secs),
        })
    }
}

impl<S> Limiter for SlidingWindow<S>
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

    // 2023-11-14T22:13:00Z, the start of a minute
    const EPOCH: u64 = 1_700_000_000 - 1_700_000_000 % 60;

    fn limiter(limit: u64) -> (SlidingWindow<MemoryStore>, Arc<quanta::Mock>, Arc<MemoryStore>) {
        let (clock, mock) = Clock::mock();
        let store = Arc::new(MemoryStore::new());
        let rl = SlidingWindow::new(
            store.clone(),
            NonZeroU64::new(limit).unwrap(),
            Duration::from_secs(60),
        )
        .with_clock(WallClock::with_clock(clock, Duration::from_secs(EPOCH)));
        (rl, mock, store)
    }

    #[tokio::test]
    async fn a_burst_counts_down_then_rejects_until_the_boundary() {
        let (rl, mock, _) = limiter(5);
        mock.increment(Duration::from_secs(15));

        let mut remaining = vec![];
        for _ in 0..5 {
            let decision = rl.allow("alice").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.limit, 5);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let rejected = rl.allow("alice").await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.reset_in, Duration::from_secs(45));
        assert!(rejected.verdict().is_break());
    }

    #[tokio::test]
    async fn rejections_do_not_grow_the_count() {
        let (rl, _, store) = limiter(2);
        for _ in 0..10 {
            let _ = rl.allow("alice").await.unwrap();
        }
        let window_id = EPOCH / 60;
        assert_eq!(
            store.peek(&format!("rl:sliding:alice:{window_id}")).as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn an_empty_key_is_not_metered() {
        let (rl, _, store) = limiter(1);
        for _ in 0..3 {
            let decision = rl.allow("").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1);
        }
        let window_id = EPOCH / 60;
        assert_eq!(store.peek(&format!("rl:sliding::{window_id}")), None);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let (rl, _, _) = limiter(1);
        assert!(rl.allow("alice").await.unwrap().allowed);
        assert!(!rl.allow("alice").await.unwrap().allowed);
        assert!(rl.allow("bob").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn the_previous_window_decays() {
        let (rl, mock, _) = limiter(10);

        // Fill window A
        for _ in 0..10 {
            assert!(rl.allow("alice").await.unwrap().allowed);
        }

        // 30s into window B the previous window still weighs half: 10 * 0.5 = 5
        mock.increment(Duration::from_secs(90));
        let mut extra = 0;
        while rl.allow("alice").await.unwrap().allowed {
            extra += 1;
        }
        assert_eq!(extra, 5);
    }

    #[tokio::test]
    async fn a_long_idle_forgets_everything() {
        let (rl, mock, _) = limiter(3);
        for _ in 0..3 {
            rl.allow("alice").await.unwrap();
        }
        mock.increment(Duration::from_secs(600));
        let decision = rl.allow("alice").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn a_steady_rate_at_the_limit_is_never_rejected() {
        let (rl, mock, _) = limiter(6);

        // One request every 10s, offset from the window boundary
        mock.increment(Duration::from_secs(5));
        for i in 0..60 {
            let decision = rl.allow("alice").await.unwrap();
            assert!(decision.allowed, "request {i} was rejected");
            mock.increment(Duration::from_secs(10));
        }
    }
}
