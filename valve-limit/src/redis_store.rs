use std::fmt;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use futures::future::BoxFuture;
use redis::Script;
use redis::aio::ConnectionManager;
use tokio::time::timeout;

use crate::AtomicStore;
use crate::BucketReply;
use crate::Error;
use crate::FixedWindowArgs;
use crate::LeakyBucketArgs;
use crate::Result;
use crate::SlidingWindowArgs;
use crate::StoreConfig;
use crate::TokenBucketArgs;
use crate::WindowReply;
use crate::scripts;

static UNLOCK: LazyLock<Script> = LazyLock::new(|| Script::new(scripts::UNLOCK));
static SLIDING_WINDOW: LazyLock<Script> = LazyLock::new(|| Script::new(scripts::SLIDING_WINDOW));
static FIXED_WINDOW: LazyLock<Script> = LazyLock::new(|| Script::new(scripts::FIXED_WINDOW));
static TOKEN_BUCKET: LazyLock<Script> = LazyLock::new(|| Script::new(scripts::TOKEN_BUCKET));
static LEAKY_BUCKET: LazyLock<Script> = LazyLock::new(|| Script::new(scripts::LEAKY_BUCKET));

/// An [`AtomicStore`] backed by any Redis-protocol server (Redis, Valkey, ...).
///
/// Scripts are sent with `EVALSHA`, falling back to `EVAL` the first time a server
/// sees them. Every round-trip is bounded by the configured response timeout.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    response_timeout: Duration,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the server named by `config.url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is invalid and [`Error::StoreUnavailable`]
    /// if the server cannot be reached within the connect timeout.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::Config(format!("store url {:?}: {e}", config.url)))?;
        let conn = timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                Error::StoreUnavailable(format!("timed out connecting to {}", config.url))
            })??;
        tracing::info!(url = %config.url, "connected to store");
        Ok(Self {
            conn,
            response_timeout: config.response_timeout(),
        })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.response_timeout, fut).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(Error::StoreUnavailable(format!(
                "{op} timed out after {:?}",
                self.response_timeout
            ))),
        }
    }
}

fn window_reply(status: i64, reset_secs: u64, remaining: i64) -> WindowReply {
    WindowReply {
        admitted: status == 0,
        remaining: remaining.max(0) as u64,
        reset_secs,
    }
}

fn bucket_reply(admitted: i64, level: &str) -> Result<BucketReply> {
    let level = level
        .parse::<f64>()
        .map_err(|e| Error::StoreUnavailable(format!("unexpected bucket level {level:?}: {e}")))?;
    Ok(BucketReply {
        admitted: admitted == 1,
        level,
    })
}

impl AtomicStore for RedisStore {
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>> {
        let mut conn = self.conn.clone();
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        Box::pin(async move {
            let reply: Option<String> = self
                .bounded(
                    "SET NX",
                    redis::cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("NX")
                        .arg("PX")
                        .arg(ttl_ms)
                        .query_async(&mut conn),
                )
                .await?;
            Ok(reply.is_some())
        })
    }

    fn compare_and_delete<'a>(
        &'a self,
        key: &'a str,
        expected: &'a str,
    ) -> BoxFuture<'a, Result<u64>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let deleted: i64 = self
                .bounded(
                    "unlock",
                    UNLOCK.key(key).arg(expected).invoke_async(&mut conn),
                )
                .await?;
            Ok(deleted.max(0) as u64)
        })
    }

    fn sliding_window<'a>(
        &'a self,
        prev_key: &'a str,
        curr_key: &'a str,
        args: SlidingWindowArgs,
    ) -> BoxFuture<'a, Result<WindowReply>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let (status, retry_after, remaining): (i64, i64, i64) = self
                .bounded(
                    "sliding window",
                    SLIDING_WINDOW
                        .key(prev_key)
                        .key(curr_key)
                        .arg(format!("{:.6}", args.weight))
                        .arg(args.limit)
                        .arg(args.retry_after_secs)
                        .arg(args.expire_secs)
                        .invoke_async(&mut conn),
                )
                .await?;
            let reset_secs = if status == 0 {
                args.retry_after_secs
            } else {
                retry_after.max(0) as u64
            };
            Ok(window_reply(status, reset_secs, remaining))
        })
    }

    fn fixed_window<'a>(
        &'a self,
        key: &'a str,
        args: FixedWindowArgs,
    ) -> BoxFuture<'a, Result<WindowReply>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let (status, ttl, remaining): (i64, i64, i64) = self
                .bounded(
                    "fixed window",
                    FIXED_WINDOW
                        .key(key)
                        .arg(args.limit)
                        .arg(args.expire_secs)
                        .invoke_async(&mut conn),
                )
                .await?;
            Ok(window_reply(status, ttl.max(0) as u64, remaining))
        })
    }

    fn token_bucket<'a>(
        &'a self,
        tokens_key: &'a str,
        ts_key: &'a str,
        args: TokenBucketArgs,
    ) -> BoxFuture<'a, Result<BucketReply>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let (admitted, tokens): (i64, String) = self
                .bounded(
                    "token bucket",
                    TOKEN_BUCKET
                        .key(tokens_key)
                        .key(ts_key)
                        .arg(args.capacity)
                        .arg(args.now)
                        .arg(args.refill_rate)
                        .invoke_async(&mut conn),
                )
                .await?;
            bucket_reply(admitted, &tokens)
        })
    }

    fn leaky_bucket<'a>(
        &'a self,
        level_key: &'a str,
        ts_key: &'a str,
        args: LeakyBucketArgs,
    ) -> BoxFuture<'a, Result<BucketReply>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let (admitted, level): (i64, String) = self
                .bounded(
                    "leaky bucket",
                    LEAKY_BUCKET
                        .key(level_key)
                        .key(ts_key)
                        .arg(args.now)
                        .arg(args.leak_rate)
                        .arg(args.capacity)
                        .invoke_async(&mut conn),
                )
                .await?;
            bucket_reply(admitted, &level)
        })
    }
}
