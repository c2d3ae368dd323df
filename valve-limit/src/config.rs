//! Configuration loading.
//!
//! Sources are merged in this order, later ones overriding earlier ones:
//! 1. [`ValveConfig::default()`]
//! 2. `valve.toml` in the working directory, if present
//! 3. Environment variables prefixed with `VALVE_`, with `__` separating nested
//!    keys (e.g. `VALVE_OWNER_LIMIT__LIMIT=50`, `VALVE_STORE__URL=redis://...`)

use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use figment::Figment;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Serialized;
use figment::providers::Toml;
use serde::Deserialize;
use serde::Serialize;

use crate::AtomicStore;
use crate::CooldownGate;
use crate::Error;
use crate::FixedWindow;
use crate::LeakyBucket;
use crate::Limiter;
use crate::LockGuard;
use crate::Result;
use crate::SlidingWindow;
use crate::TokenBucket;
use crate::guard::DEFAULT_LOCK_PREFIX;
use crate::guard::DEFAULT_LOCK_TTL;
use crate::guard::DEFAULT_POLL_INTERVAL;

pub const CONFIG_FILE: &str = "valve.toml";
pub const ENV_PREFIX: &str = "VALVE_";

/// Everything needed to assemble the admission pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValveConfig {
    pub store: StoreConfig,
    /// Applied before authentication, keyed by client address.
    pub peer_limit: LimiterConfig,
    /// Applied after authentication, keyed by the authenticated owner.
    pub owner_limit: LimiterConfig,
    pub guard: GuardConfig,
    /// A process-wide gate in front of everything else; disabled when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<CooldownConfig>,
}

impl Default for ValveConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            peer_limit: LimiterConfig::SlidingWindow {
                limit: 100,
                window_secs: 60,
                prefix: Some("rl:ip".to_string()),
            },
            owner_limit: LimiterConfig::SlidingWindow {
                limit: 100,
                window_secs: 60,
                prefix: Some("rl:uid".to_string()),
            },
            guard: GuardConfig::default(),
            cooldown: None,
        }
    }
}

impl ValveConfig {
    /// The default provider chain, exposed so callers can merge their own sources.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self> {
        Self::from_figment(&Self::figment())
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.url.is_empty() {
            return Err(Error::Config("store.url must not be empty".to_string()));
        }
        self.peer_limit.validate("peer_limit")?;
        self.owner_limit.validate("owner_limit")?;
        self.guard.validate()
    }
}

/// Connection settings for [`crate::RedisStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub connect_timeout_ms: u64,
    /// Bound on every store round-trip.
    pub response_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_ms: 5_000,
            response_timeout_ms: 3_000,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// One limiter, selected by its `algorithm` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterConfig {
    SlidingWindow {
        limit: u64,
        window_secs: u64,
        #[serde(default)]
        prefix: Option<String>,
    },
    FixedWindow {
        limit: u64,
        window_secs: u64,
        #[serde(default)]
        prefix: Option<String>,
    },
    TokenBucket {
        capacity: u64,
        /// Tokens per second.
        refill_rate: f64,
        #[serde(default)]
        prefix: Option<String>,
    },
    LeakyBucket {
        capacity: u64,
        /// Units per second.
        leak_rate: f64,
        #[serde(default)]
        prefix: Option<String>,
    },
}

fn positive(field: &str, name: &str, value: u64) -> Result<NonZeroU64> {
    NonZeroU64::new(value).ok_or_else(|| Error::Config(format!("{field}.{name} must be positive")))
}

fn rate(field: &str, name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(Error::Config(format!(
            "{field}.{name} must be a non-negative number, got {value}"
        )))
    }
}

impl LimiterConfig {
    pub fn validate(&self, field: &str) -> Result<()> {
        match self {
            Self::SlidingWindow {
                limit, window_secs, ..
            }
            | Self::FixedWindow {
                limit, window_secs, ..
            } => {
                positive(field, "limit", *limit)?;
                positive(field, "window_secs", *window_secs)?;
            }
            Self::TokenBucket {
                capacity,
                refill_rate,
                ..
            } => {
                positive(field, "capacity", *capacity)?;
                rate(field, "refill_rate", *refill_rate)?;
            }
            Self::LeakyBucket {
                capacity, leak_rate, ..
            } => {
                positive(field, "capacity", *capacity)?;
                rate(field, "leak_rate", *leak_rate)?;
            }
        }
        Ok(())
    }

    /// Build the configured limiter over `store`.
    pub fn build<S>(&self, store: Arc<S>) -> Result<Arc<dyn Limiter>>
    where
        S: AtomicStore + ?Sized + 'static,
    {
        let field = "limiter";
        let limiter: Arc<dyn Limiter> = match self {
            Self::SlidingWindow {
                limit,
                window_secs,
                prefix,
            } => {
                let limiter = SlidingWindow::new(
                    store,
                    positive(field, "limit", *limit)?,
                    Duration::from_secs(positive(field, "window_secs", *window_secs)?.get()),
                );
                match prefix {
                    Some(prefix) => Arc::new(limiter.with_prefix(prefix)),
                    None => Arc::new(limiter),
                }
            }
            Self::FixedWindow {
                limit,
                window_secs,
                prefix,
            } => {
                let limiter = FixedWindow::new(
                    store,
                    positive(field, "limit", *limit)?,
                    Duration::from_secs(positive(field, "window_secs", *window_secs)?.get()),
                );
                match prefix {
                    Some(prefix) => Arc::new(limiter.with_prefix(prefix)),
                    None => Arc::new(limiter),
                }
            }
            Self::TokenBucket {
                capacity,
                refill_rate,
                prefix,
            } => {
                let limiter = TokenBucket::new(
                    store,
                    positive(field, "capacity", *capacity)?,
                    rate(field, "refill_rate", *refill_rate)?,
                );
                match prefix {
                    Some(prefix) => Arc::new(limiter.with_prefix(prefix)),
                    None => Arc::new(limiter),
                }
            }
            Self::LeakyBucket {
                capacity,
                leak_rate,
                prefix,
            } => {
                let limiter = LeakyBucket::new(
                    store,
                    positive(field, "capacity", *capacity)?,
                    rate(field, "leak_rate", *leak_rate)?,
                );
                match prefix {
                    Some(prefix) => Arc::new(limiter.with_prefix(prefix)),
                    None => Arc::new(limiter),
                }
            }
        };
        Ok(limiter)
    }
}

/// Settings of the per-owner [`LockGuard`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub ttl_ms: u64,
    /// Zero rejects immediately when the lock is held.
    pub wait_ms: u64,
    pub poll_interval_ms: u64,
    pub prefix: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_LOCK_TTL.as_millis() as u64,
            wait_ms: 0,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            prefix: DEFAULT_LOCK_PREFIX.to_string(),
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> Result<()> {
        positive("guard", "ttl_ms", self.ttl_ms)?;
        if self.wait_ms > 0 {
            positive("guard", "poll_interval_ms", self.poll_interval_ms)?;
        }
        Ok(())
    }

    pub fn build<S>(&self, store: Arc<S>) -> Result<LockGuard<S>>
    where
        S: AtomicStore + ?Sized,
    {
        self.validate()?;
        Ok(LockGuard::new(store, Duration::from_millis(self.ttl_ms))
            .with_prefix(&self.prefix)
            .with_wait(Duration::from_millis(self.wait_ms))
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms)))
    }
}

/// Settings of the process-wide [`CooldownGate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownConfig {
    pub period_ms: u64,
}

impl CooldownConfig {
    pub fn build(&self) -> CooldownGate {
        CooldownGate::new(Duration::from_millis(self.period_ms))
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;
    use crate::MemoryStore;

    #[test]
    fn defaults_are_valid() {
        let config = ValveConfig::default();
        config.validate().unwrap();
        assert_eq!(config.store.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.store.response_timeout(), Duration::from_secs(3));
        assert_eq!(config.guard.ttl_ms, 10_000);
        assert_eq!(config.guard.prefix, "lock:uid");
        assert!(config.cooldown.is_none());
    }

    #[test]
    fn it_merges_file_and_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                [store]
                url = "redis://cache:6379"

                [owner_limit]
                algorithm = "token_bucket"
                capacity = 20
                refill_rate = 2.5

                [cooldown]
                period_ms = 250
                "#,
            )?;
            jail.set_env("VALVE_OWNER_LIMIT__CAPACITY", "40");
            jail.set_env("VALVE_GUARD__WAIT_MS", "500");

            let config = ValveConfig::load().unwrap();
            assert_eq!(config.store.url, "redis://cache:6379");
            assert_eq!(config.store.response_timeout_ms, 3_000);
            assert_eq!(
                config.owner_limit,
                LimiterConfig::TokenBucket {
                    capacity: 40,
                    refill_rate: 2.5,
                    prefix: Some("rl:uid".to_string()),
                }
            );
            assert_eq!(config.guard.wait_ms, 500);
            assert_eq!(config.guard.poll_interval_ms, 50);
            assert_eq!(config.cooldown, Some(CooldownConfig { period_ms: 250 }));
            Ok(())
        });
    }

    #[test]
    fn it_rejects_zero_limits() {
        Jail::expect_with(|jail| {
            jail.set_env("VALVE_PEER_LIMIT__LIMIT", "0");
            let err = ValveConfig::load().unwrap_err();
            assert!(matches!(err, Error::Config(ref msg) if msg.contains("peer_limit.limit")));
            Ok(())
        });
    }

    #[test]
    fn it_rejects_unknown_algorithms() {
        Jail::expect_with(|jail| {
            jail.set_env("VALVE_PEER_LIMIT__ALGORITHM", "gcra");
            assert!(matches!(ValveConfig::load(), Err(Error::Config(_))));
            Ok(())
        });
    }

    #[test]
    fn negative_rates_are_invalid() {
        let config = LimiterConfig::LeakyBucket {
            capacity: 5,
            leak_rate: -1.0,
            prefix: None,
        };
        assert!(config.validate("owner_limit").is_err());
        assert!(config.build(Arc::new(MemoryStore::new())).is_err());
    }

    #[tokio::test]
    async fn it_builds_working_limiters() {
        let store = Arc::new(MemoryStore::new());
        let config = LimiterConfig::FixedWindow {
            limit: 2,
            window_secs: 60,
            prefix: Some("rl:ip".to_string()),
        };
        let limiter = config.build(store.clone()).unwrap();

        assert_eq!(limiter.limit(), 2);
        assert!(limiter.allow("198.51.100.4").await.unwrap().allowed);
        assert!(limiter.allow("198.51.100.4").await.unwrap().allowed);
        assert!(!limiter.allow("198.51.100.4").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn it_builds_the_guard() {
        let store = Arc::new(MemoryStore::new());
        let guard = GuardConfig {
            prefix: "lock:test".to_string(),
            ..GuardConfig::default()
        }
        .build(store.clone())
        .unwrap();

        let cancel = tokio_util::sync::CancellationToken::new();
        let acquisition = crate::Guard::acquire(&guard, "alice", &cancel).await.unwrap();
        assert_eq!(acquisition.lease().unwrap().key(), "lock:test:alice");
    }
}
