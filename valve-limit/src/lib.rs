//! # valve-limit
//!
//! `valve-limit` provides admission control primitives whose state lives in a shared,
//! external key-value store, so that every process serving a partition key sees the
//! same counters and the same locks.
//!
//! ## Core Philosophy
//!
//! Read-modify-write from several application processes is racy. Every state
//! transition here is a single atomic script executed by the store itself
//! (see [`AtomicStore`]), so two concurrent callers for the same key can never
//! both observe the pre-mutation state. Nothing is cached in process memory.
//!
//! ## Key Concepts
//!
//! * **Limiter Trait**: a unified `allow(key)` contract over four algorithms:
//!   [`SlidingWindow`], [`FixedWindow`], [`TokenBucket`] and [`LeakyBucket`].
//! * **Guard Trait**: per-owner mutual exclusion with TTL self-healing and
//!   token-matched release ([`LockGuard`]).
//! * **Fail-Open**: [`FailOpen`] wraps any limiter or guard and admits requests
//!   when the store cannot be reached.
//! * **Explicit Time**: the caller's wall clock ([`WallClock`]) is passed into every
//!   script, so scripts are pure functions of their inputs.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroU64;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use valve_limit::Limiter;
//! use valve_limit::MemoryStore;
//! use valve_limit::SlidingWindow;
//!
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let store = Arc::new(MemoryStore::new());
//! let limit = NonZeroU64::new(100).unwrap();
//! let limiter = SlidingWindow::new(store, limit, Duration::from_secs(60));
//!
//! let decision = limiter.allow("203.0.113.7").await.unwrap();
//! if decision.verdict().is_continue() {
//!     // Request allowed
//! }
//! # }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

mod clock;
mod config;
mod cooldown;
mod error;
mod fail_open;
mod fixed_window;
mod guard;
mod key;
mod leaky_bucket;
mod memory;
mod redis_store;
mod scripts;
mod sliding_window;
mod store;
mod token_bucket;

pub use clock::WallClock;
pub use config::CooldownConfig;
pub use config::GuardConfig;
pub use config::LimiterConfig;
pub use config::StoreConfig;
pub use config::ValveConfig;
pub use cooldown::CooldownGate;
pub use error::Error;
pub use error::Result;
pub use fail_open::FailOpen;
pub use fixed_window::FixedWindow;
pub use guard::Acquisition;
pub use guard::Guard;
pub use guard::Lease;
pub use guard::LockGuard;
pub use key::KeyResolver;
pub use key::Namespace;
pub use leaky_bucket::LeakyBucket;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use sliding_window::SlidingWindow;
pub use store::AtomicStore;
pub use store::BucketReply;
pub use store::FixedWindowArgs;
pub use store::LeakyBucketArgs;
pub use store::SlidingWindowArgs;
pub use store::TokenBucketArgs;
pub use store::WindowReply;
pub use token_bucket::TokenBucket;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, PartialEq)]
pub enum Reason {
    Overloaded { retry_after: Duration },
}

/// The outcome of a single [`Limiter::allow`] call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// The configured limit (or capacity) of the limiter that decided.
    pub limit: u64,
    /// Quota left for this key after the call.
    pub remaining: u64,
    /// On rejection, the retry hint. On admission, time until the quota resets.
    pub reset_in: Duration,
}

impl Decision {
    /// An admitting decision that was not checked against the store.
    pub fn unchecked(limit: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_in: Duration::ZERO,
        }
    }

    pub fn verdict(&self) -> ControlFlow<Reason> {
        if self.allowed {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(Reason::Overloaded {
                retry_after: self.reset_in.max(Duration::from_secs(1)),
            })
        }
    }
}

/// The core trait for all rate-limiting algorithms.
///
/// Limiters must be `Send` and `Sync` to allow sharing across tasks via `Arc`.
pub trait Limiter: Send + Sync + Debug {
    /// Evaluates and records a single request for `key` in one atomic step.
    ///
    /// A rejection is a normal [`Decision`], not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the backing store could not be consulted.
    fn allow<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Decision>>;

    /// The configured limit (or capacity), reported in response headers.
    fn limit(&self) -> u64;
}

impl<L> Limiter for Arc<L>
where
    L: Limiter + ?Sized,
{
    fn allow<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Decision>> {
        (**self).allow(key)
    }

    fn limit(&self) -> u64 {
        (**self).limit()
    }
}

/// Whole seconds needed to move `amount` units at `rate` units per second.
pub(crate) fn secs_to_cover(amount: f64, rate: f64) -> u64 {
    if amount <= 0.0 || rate <= 0.0 {
        0
    } else {
        (amount / rate).ceil() as u64
    }
}
