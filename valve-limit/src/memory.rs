use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::ready;
use tokio::time::Instant;

use crate::AtomicStore;
use crate::BucketReply;
use crate::FixedWindowArgs;
use crate::LeakyBucketArgs;
use crate::Result;
use crate::SlidingWindowArgs;
use crate::TokenBucketArgs;
use crate::WindowReply;
use crate::store::BUCKET_TTL;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// How often a call sweeps every expired entry, not just the keys it touches.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// String values with TTL expiry, mirroring the subset of Redis the scripts use.
///
/// Keys are expired lazily when read and swept in bulk at most once per
/// [`SWEEP_INTERVAL`], so window keys that are never read again still go away.
#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    next_sweep: Option<Instant>,
}

impl Entries {
    fn sweep(&mut self, now: Instant) {
        if self.next_sweep.is_some_and(|at| now < at) {
            return;
        }
        self.map.retain(|_, e| e.expires_at.is_none_or(|at| at > now));
        self.next_sweep = Some(now + SWEEP_INTERVAL);
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<&str> {
        if self
            .map
            .get(key)
            .is_some_and(|e| e.expires_at.is_some_and(|at| at <= now))
        {
            self.map.remove(key);
        }
        self.map.get(key).map(|e| e.value.as_str())
    }

    fn number(&mut self, key: &str, now: Instant) -> Option<f64> {
        self.get(key, now).and_then(|v| v.parse().ok())
    }

    fn set(&mut self, key: &str, value: String, ttl: Option<Duration>, now: Instant) {
        let expires_at = ttl.map(|ttl| now + ttl);
        self.map.insert(key.to_string(), Entry { value, expires_at });
    }

    fn incr(&mut self, key: &str, now: Instant) -> u64 {
        let current = self.number(key, now).unwrap_or(0.0) as u64 + 1;
        match self.map.get_mut(key) {
            Some(entry) => entry.value = current.to_string(),
            None => self.set(key, current.to_string(), None, now),
        }
        current
    }

    fn expire(&mut self, key: &str, ttl: Duration, now: Instant) {
        if let Some(entry) = self.map.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
    }

    /// Whole seconds left to live, `None` if the key is missing or persistent.
    fn ttl_secs(&mut self, key: &str, now: Instant) -> Option<u64> {
        self.get(key, now)?;
        let at = self.map.get(key)?.expires_at?;
        Some(at.saturating_duration_since(now).as_secs())
    }
}

/// An [`AtomicStore`] living in process memory.
///
/// Every script runs to completion under one mutex, which gives the same
/// linearizability a Redis server gives its scripts, but only within this process.
/// Expiry follows `tokio::time`, so paused test clocks drive TTLs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a raw value, as `GET` would.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.with_entries(|entries, now| entries.get(key, now).map(str::to_string))
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Entries, Instant) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries.sweep(now);
        f(&mut entries, now)
    }
}

impl AtomicStore for MemoryStore {
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>> {
        let created = self.with_entries(|entries, now| {
            if entries.get(key, now).is_some() {
                false
            } else {
                entries.set(key, value.to_string(), Some(ttl), now);
                true
            }
        });
        ready(Ok(created)).boxed()
    }

    fn compare_and_delete<'a>(
        &'a self,
        key: &'a str,
        expected: &'a str,
    ) -> BoxFuture<'a, Result<u64>> {
        let deleted = self.with_entries(|entries, now| {
            if entries.get(key, now) == Some(expected) {
                entries.map.remove(key);
                1
            } else {
                0
            }
        });
        ready(Ok(deleted)).boxed()
    }

    fn sliding_window<'a>(
        &'a self,
        prev_key: &'a str,
        curr_key: &'a str,
        args: SlidingWindowArgs,
    ) -> BoxFuture<'a, Result<WindowReply>> {
        let reply = self.with_entries(|entries, now| {
            let prev = entries.number(prev_key, now).unwrap_or(0.0);
            let curr = entries.number(curr_key, now).unwrap_or(0.0);
            let limit = args.limit as f64;

            let rate = prev * args.weight + curr;
            if rate >= limit {
                return WindowReply {
                    admitted: false,
                    remaining: 0,
                    reset_secs: args.retry_after_secs,
                };
            }

            entries.incr(curr_key, now);
            entries.expire(curr_key, Duration::from_secs(args.expire_secs), now);
            WindowReply {
                admitted: true,
                remaining: (limit - rate - 1.0).floor().max(0.0) as u64,
                reset_secs: args.retry_after_secs,
            }
        });
        ready(Ok(reply)).boxed()
    }

    fn fixed_window<'a>(
        &'a self,
        key: &'a str,
        args: FixedWindowArgs,
    ) -> BoxFuture<'a, Result<WindowReply>> {
        let reply = self.with_entries(|entries, now| {
            let expiry = Duration::from_secs(args.expire_secs);
            let current = entries.incr(key, now);
            if current == 1 {
                entries.expire(key, expiry, now);
            }

            let ttl = match entries.ttl_secs(key, now) {
                Some(ttl) => ttl,
                None => {
                    entries.expire(key, expiry, now);
                    args.expire_secs
                }
            };

            if current > args.limit {
                WindowReply {
                    admitted: false,
                    remaining: 0,
                    reset_secs: ttl,
                }
            } else {
                WindowReply {
                    admitted: true,
                    remaining: args.limit - current,
                    reset_secs: ttl,
                }
            }
        });
        ready(Ok(reply)).boxed()
    }

    fn token_bucket<'a>(
        &'a self,
        tokens_key: &'a str,
        ts_key: &'a str,
        args: TokenBucketArgs,
    ) -> BoxFuture<'a, Result<BucketReply>> {
        let reply = self.with_entries(|entries, now| {
            let capacity = args.capacity as f64;
            let tokens = entries.number(tokens_key, now).unwrap_or(capacity);
            let last = entries.number(ts_key, now).unwrap_or(args.now);

            let delta = (args.now - last).max(0.0);
            let mut tokens = capacity.min(tokens + delta * args.refill_rate);

            let admitted = tokens >= 1.0;
            if admitted {
                tokens -= 1.0;
            }

            entries.set(tokens_key, tokens.to_string(), Some(BUCKET_TTL), now);
            entries.set(ts_key, args.now.max(last).to_string(), Some(BUCKET_TTL), now);
            BucketReply {
                admitted,
                level: tokens,
            }
        });
        ready(Ok(reply)).boxed()
    }

    fn leaky_bucket<'a>(
        &'a self,
        level_key: &'a str,
        ts_key: &'a str,
        args: LeakyBucketArgs,
    ) -> BoxFuture<'a, Result<BucketReply>> {
        let reply = self.with_entries(|entries, now| {
            let level = entries.number(level_key, now).unwrap_or(0.0);
            let last = entries.number(ts_key, now).unwrap_or(args.now);

            let mut level = (level - (args.now - last).max(0.0) * args.leak_rate).max(0.0);

            let admitted = level + 1.0 <= args.capacity as f64;
            if admitted {
                level += 1.0;
            }

            entries.set(level_key, level.to_string(), Some(BUCKET_TTL), now);
            entries.set(ts_key, args.now.max(last).to_string(), Some(BUCKET_TTL), now);
            BucketReply { admitted, level }
        });
        ready(Ok(reply)).boxed()
    }
}
