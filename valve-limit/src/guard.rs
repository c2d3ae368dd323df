use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::AtomicStore;
use crate::Error;
use crate::Namespace;
use crate::Result;

pub(crate) const DEFAULT_LOCK_PREFIX: &str = "lock:uid";
pub(crate) const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Proof of holding a lock: the record's key and the token written into it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    key: String,
    token: String,
}

impl Lease {
    /// A fresh lease with a 128-bit random token.
    pub(crate) fn new(key: String) -> Self {
        let token: u128 = rand::random();
        Self {
            key,
            token: format!("{token:032x}"),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// The outcome of [`Guard::acquire`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Acquisition {
    /// The lock is held until released or until its TTL expires.
    Acquired(Lease),
    /// Another holder owns the lock.
    Busy,
    /// No lock was taken and the request proceeds unserialized: the store could
    /// not be consulted, or there was no owner to lock.
    Bypassed,
}

impl Acquisition {
    /// Whether the caller may proceed.
    pub fn is_acquired(&self) -> bool {
        !matches!(self, Self::Busy)
    }

    pub fn lease(&self) -> Option<&Lease> {
        match self {
            Self::Acquired(lease) => Some(lease),
            _ => None,
        }
    }
}

/// Mutual exclusion between all in-flight operations of one owner.
pub trait Guard: Send + Sync + Debug {
    /// Try to take the lock for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires while waiting, and
    /// [`Error::StoreUnavailable`] if the store could not be consulted.
    fn acquire<'a>(
        &'a self,
        owner: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Acquisition>>;

    /// Give the lock back. Returns `false`, without error, if the lease no longer
    /// matches the stored record (it expired, and possibly has a new holder).
    fn release<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<bool>>;
}

impl<G> Guard for Arc<G>
where
    G: Guard + ?Sized,
{
    fn acquire<'a>(
        &'a self,
        owner: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Acquisition>> {
        (**self).acquire(owner, cancel)
    }

    fn release<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<bool>> {
        (**self).release(lease)
    }
}

/// A TTL lock per owner, stored as `<prefix>:<owner>`.
///
/// With `wait` of zero (the default) contention is reported immediately. Otherwise
/// acquisition is retried every `poll_interval` until `wait` elapses.
#[derive(Debug)]
pub struct LockGuard<S>
where
    S: ?Sized,
{
    store: Arc<S>,
    namespace: Namespace,
    ttl: Duration,
    wait: Duration,
    poll_interval: Duration,
}

impl<S> LockGuard<S>
where
    S: AtomicStore + ?Sized,
{
    pub fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self {
            store,
            namespace: Namespace::new(DEFAULT_LOCK_PREFIX),
            ttl,
            wait: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.namespace = Namespace::new(prefix);
        self
    }

    /// Wait up to `wait` for a busy lock. Zero selects reject mode.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn acquire_lock(&self, owner: &str, cancel: &CancellationToken) -> Result<Acquisition> {
        let Some(key) = self.namespace.key(owner) else {
            return Ok(Acquisition::Bypassed);
        };
        let lease = Lease::new(key);
        let deadline = Instant::now() + self.wait;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // A lock set by an abandoned round-trip lapses with its TTL
            let acquired = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                acquired = self.store.set_if_absent(&lease.key, &lease.token, self.ttl) => acquired?,
            };
            if acquired {
                tracing::debug!(key = %lease.key, "lock acquired");
                return Ok(Acquisition::Acquired(lease));
            }

            let now = Instant::now();
            if self.wait.is_zero() || now >= deadline {
                tracing::debug!(key = %lease.key, "lock busy");
                return Ok(Acquisition::Busy);
            }

            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(pause) => {}
            }
        }
    }
}

impl<S> Guard for LockGuard<S>
where
    S: AtomicStore + ?Sized,
{
    fn acquire<'a>(
        &'a self,
        owner: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Acquisition>> {
        Box::pin(self.acquire_lock(owner, cancel))
    }

    fn release<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let deleted = self
                .store
                .compare_and_delete(&lease.key, &lease.token)
                .await?;
            if deleted == 0 {
                tracing::debug!(key = %lease.key, "lock no longer held by this lease");
            }
            Ok(deleted > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use futures::future::join_all;
    use futures::future::pending;

    use super::*;
    use crate::BucketReply;
    use crate::FixedWindowArgs;
    use crate::LeakyBucketArgs;
    use crate::MemoryStore;
    use crate::SlidingWindowArgs;
    use crate::TokenBucketArgs;
    use crate::WindowReply;

    /// A store whose `SET NX` never answers.
    #[derive(Debug, Default)]
    struct Stalled(MemoryStore);

    impl AtomicStore for Stalled {
        fn set_if_absent<'a>(
            &'a self,
            _key: &'a str,
            _value: &'a str,
            _ttl: Duration,
        ) -> BoxFuture<'a, Result<bool>> {
            pending().boxed()
        }

        fn compare_and_delete<'a>(
            &'a self,
            key: &'a str,
            expected: &'a str,
        ) -> BoxFuture<'a, Result<u64>> {
            self.0.compare_and_delete(key, expected)
        }

        fn sliding_window<'a>(
            &'a self,
            prev_key: &'a str,
            curr_key: &'a str,
            args: SlidingWindowArgs,
        ) -> BoxFuture<'a, Result<WindowReply>> {
            self.0.sliding_window(prev_key, curr_key, args)
        }

        fn fixed_window<'a>(
            &'a self,
            key: &'a str,
            args: FixedWindowArgs,
        ) -> BoxFuture<'a, Result<WindowReply>> {
            self.0.fixed_window(key, args)
        }

        fn token_bucket<'a>(
            &'a self,
            tokens_key: &'a str,
            ts_key: &'a str,
            args: TokenBucketArgs,
        ) -> BoxFuture<'a, Result<BucketReply>> {
            self.0.token_bucket(tokens_key, ts_key, args)
        }

        fn leaky_bucket<'a>(
            &'a self,
            level_key: &'a str,
            ts_key: &'a str,
            args: LeakyBucketArgs,
        ) -> BoxFuture<'a, Result<BucketReply>> {
            self.0.leaky_bucket(level_key, ts_key, args)
        }
    }

    fn guard(store: &Arc<MemoryStore>) -> LockGuard<MemoryStore> {
        LockGuard::new(Arc::clone(store), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn reject_mode_reports_contention_until_release() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);
        let cancel = CancellationToken::new();

        let first = guard.acquire("owner-a", &cancel).await.unwrap();
        let lease = first.lease().cloned().expect("first call acquires");
        assert_eq!(lease.key(), "lock:uid:owner-a");
        assert_eq!(lease.token().len(), 32);

        assert_eq!(
            guard.acquire("owner-a", &cancel).await.unwrap(),
            Acquisition::Busy
        );
        // Other owners are independent partitions
        assert!(guard.acquire("owner-b", &cancel).await.unwrap().is_acquired());

        assert!(guard.release(&lease).await.unwrap());
        assert!(guard.acquire("owner-a", &cancel).await.unwrap().is_acquired());
    }

    #[tokio::test]
    async fn stale_release_keeps_the_new_holders_lock() {
        tokio::time::pause();
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);
        let cancel = CancellationToken::new();

        let stale = guard.acquire("owner-a", &cancel).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        let fresh = guard.acquire("owner-a", &cancel).await.unwrap();
        let fresh = fresh.lease().expect("expired lock is taken over");

        assert!(!guard.release(stale.lease().unwrap()).await.unwrap());
        assert_eq!(store.peek("lock:uid:owner-a").as_deref(), Some(fresh.token()));
        assert_eq!(
            guard.acquire("owner-a", &cancel).await.unwrap(),
            Acquisition::Busy
        );
    }

    #[tokio::test]
    async fn an_empty_owner_is_never_locked() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);
        let cancel = CancellationToken::new();

        assert_eq!(guard.acquire("", &cancel).await.unwrap(), Acquisition::Bypassed);
        assert_eq!(guard.acquire("", &cancel).await.unwrap(), Acquisition::Bypassed);
        assert_eq!(store.peek("lock:uid:"), None);
    }

    #[tokio::test]
    async fn releasing_a_never_held_lease_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);
        let phantom = Lease::new("lock:uid:nobody".to_string());
        assert!(!guard.release(&phantom).await.unwrap());
    }

    #[tokio::test]
    async fn test_actual_concurrency() {
        let store = Arc::new(MemoryStore::new());
        let guard = Arc::new(guard(&store));
        let cancel = CancellationToken::new();

        let attempts = (0..32).map(|_| {
            let guard = Arc::clone(&guard);
            let cancel = cancel.clone();
            tokio::spawn(async move { guard.acquire("owner-a", &cancel).await })
        });

        let acquired = join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(Acquisition::Acquired(_)))))
            .count();
        assert_eq!(acquired, 1);
    }

    #[tokio::test]
    async fn wait_mode_acquires_once_the_holder_releases() {
        tokio::time::pause();
        let store = Arc::new(MemoryStore::new());
        let guard = Arc::new(guard(&store).with_wait(Duration::from_secs(1)));
        let cancel = CancellationToken::new();

        let held = guard.acquire("owner-a", &cancel).await.unwrap();
        let lease = held.lease().cloned().unwrap();

        let waiter = {
            let guard = Arc::clone(&guard);
            let cancel = cancel.clone();
            tokio::spawn(async move { guard.acquire("owner-a", &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!waiter.is_finished());
        guard.release(&lease).await.unwrap();

        let waited = waiter.await.unwrap().unwrap();
        assert!(matches!(waited, Acquisition::Acquired(_)));
    }

    #[tokio::test]
    async fn wait_mode_gives_up_after_the_wait() {
        tokio::time::pause();
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store).with_wait(Duration::from_millis(200));
        let cancel = CancellationToken::new();

        guard.acquire("owner-a", &cancel).await.unwrap();

        let start = Instant::now();
        assert_eq!(
            guard.acquire("owner-a", &cancel).await.unwrap(),
            Acquisition::Busy
        );
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn cancellation_is_distinct_from_contention() {
        tokio::time::pause();
        let store = Arc::new(MemoryStore::new());
        let guard = Arc::new(guard(&store).with_wait(Duration::from_secs(60)));
        let cancel = CancellationToken::new();

        guard.acquire("owner-a", &cancel).await.unwrap();

        let waiter = {
            let guard = Arc::clone(&guard);
            let cancel = cancel.clone();
            tokio::spawn(async move { guard.acquire("owner-a", &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(75)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_store_round_trip() {
        tokio::time::pause();
        let guard = Arc::new(
            LockGuard::new(Arc::new(Stalled::default()), Duration::from_secs(10))
                .with_wait(Duration::from_secs(60)),
        );
        let cancel = CancellationToken::new();

        let waiter = {
            let guard = Arc::clone(&guard);
            let cancel = cancel.clone();
            tokio::spawn(async move { guard.acquire("owner-a", &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(Error::Cancelled));
    }
}
