use std::fmt::Debug;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::Result;

/// Inputs of the sliding window counter script.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlidingWindowArgs {
    /// Share of the previous window still overlapping the current instant, in `[0, 1]`.
    pub weight: f64,
    pub limit: u64,
    /// Seconds until the current window ends; returned as the retry hint on rejection.
    pub retry_after_secs: u64,
    /// Expiry applied to the current bucket on every admit.
    pub expire_secs: u64,
}

/// Inputs of the fixed window counter script.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedWindowArgs {
    pub limit: u64,
    /// Expiry applied when the window's counter is first created.
    pub expire_secs: u64,
}

/// Inputs of the token bucket script.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TokenBucketArgs {
    pub capacity: u64,
    /// Caller's wall clock, seconds since the Unix epoch.
    pub now: f64,
    /// Tokens added per elapsed second.
    pub refill_rate: f64,
}

/// Inputs of the leaky bucket script.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LeakyBucketArgs {
    /// Caller's wall clock, seconds since the Unix epoch.
    pub now: f64,
    /// Units drained per elapsed second.
    pub leak_rate: f64,
    pub capacity: u64,
}

/// Result of a window counter script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowReply {
    pub admitted: bool,
    pub remaining: u64,
    pub reset_secs: u64,
}

/// Result of a bucket script: the stored token count or level after the call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BucketReply {
    pub admitted: bool,
    pub level: f64,
}

/// Bucket state keeps its entries for an hour after the last call.
pub(crate) const BUCKET_TTL: Duration = Duration::from_secs(3600);

/// A shared store that can execute each admission script as one indivisible step.
///
/// No other operation may interleave between a script's reads and writes. Errors
/// are surfaced unmodified as [`crate::Error::StoreUnavailable`]; implementations
/// never retry.
pub trait AtomicStore: Send + Sync + Debug {
    /// Create `key` holding `value` with the given TTL, only if it does not exist.
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Delete `key` only if it currently holds `expected`. Returns the count deleted.
    fn compare_and_delete<'a>(&'a self, key: &'a str, expected: &'a str)
    -> BoxFuture<'a, Result<u64>>;

    /// Weighted two-bucket admission. The current bucket is only incremented on admit.
    fn sliding_window<'a>(
        &'a self,
        prev_key: &'a str,
        curr_key: &'a str,
        args: SlidingWindowArgs,
    ) -> BoxFuture<'a, Result<WindowReply>>;

    /// Single counter admission. The counter is incremented on every call.
    fn fixed_window<'a>(
        &'a self,
        key: &'a str,
        args: FixedWindowArgs,
    ) -> BoxFuture<'a, Result<WindowReply>>;

    /// Refill then take one token. State is persisted on both paths.
    fn token_bucket<'a>(
        &'a self,
        tokens_key: &'a str,
        ts_key: &'a str,
        args: TokenBucketArgs,
    ) -> BoxFuture<'a, Result<BucketReply>>;

    /// Leak then add one unit. State is persisted on both paths.
    fn leaky_bucket<'a>(
        &'a self,
        level_key: &'a str,
        ts_key: &'a str,
        args: LeakyBucketArgs,
    ) -> BoxFuture<'a, Result<BucketReply>>;
}
