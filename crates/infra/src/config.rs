//! Runtime configuration loaded from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `FLEET_STATS_BIND_ADDR` | `0.0.0.0:8080` |
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `DATABASE_URL` | required when persistent |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `FLEET_STATS_CHANNEL` | `fleet-statistics-updated` |
//! | `FLEET_STATS_MERGE_ORDER` | `merge_then_mark` |
//! | `FLEET_STATS_STORE_TIMEOUT_MS` | `5000` |
//! | `FLEET_STATS_RETRY_MAX_ATTEMPTS` | `3` |
//! | `FLEET_STATS_RETRY_BASE_DELAY_MS` | `100` |
//! | `FLEET_STATS_RETRY_MAX_DELAY_MS` | `2000` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::ingest::{IngestOptions, MergeOrder};
use crate::retry::RetryPolicy;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_CHANNEL: &str = "fleet-statistics-updated";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FleetStatsConfig {
    pub bind_addr: String,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,
    /// Pub/sub channel change notifications are published on.
    pub channel: String,
    pub merge_order: MergeOrder,
    pub store_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for FleetStatsConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            use_persistent_stores: false,
            database_url: None,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            merge_order: MergeOrder::default(),
            store_timeout: Duration::from_millis(5000),
            retry: RetryPolicy::default(),
        }
    }
}

impl FleetStatsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let use_persistent_stores = parse_or(&get, "USE_PERSISTENT_STORES", false)?;
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "FLEET_STATS_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: millis_or(&get, "FLEET_STATS_RETRY_BASE_DELAY_MS", defaults.retry.base_delay)?,
            max_delay: millis_or(&get, "FLEET_STATS_RETRY_MAX_DELAY_MS", defaults.retry.max_delay)?,
            strategy: defaults.retry.strategy,
        };

        let store_timeout = millis_or(&get, "FLEET_STATS_STORE_TIMEOUT_MS", defaults.store_timeout)?;
        if store_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "FLEET_STATS_STORE_TIMEOUT_MS",
                value: "0".into(),
                reason: "timeout must be positive".into(),
            });
        }

        Ok(Self {
            bind_addr: get("FLEET_STATS_BIND_ADDR").unwrap_or(defaults.bind_addr),
            use_persistent_stores,
            database_url,
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            channel: get("FLEET_STATS_CHANNEL").unwrap_or(defaults.channel),
            merge_order: parse_or(&get, "FLEET_STATS_MERGE_ORDER", defaults.merge_order)?,
            store_timeout,
            retry,
        })
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            merge_order: self.merge_order,
            store_timeout: self.store_timeout,
            retry: self.retry.clone(),
        }
    }
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn millis_or<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_millis() as u64).map(Duration::from_millis)
}
