// ============================================================================
// Asynchroza Config - Centralized configuration management
// ============================================================================
//
// Configuration for the dispatcher, loaded from environment variables (and an
// optional .env file) with defaults for everything except the store address and
// the consumer endpoint list.
//
// ============================================================================

mod constants;
mod consumers;
mod error;
mod leadership;
mod metrics;
mod redelivery;
mod redis;

pub use consumers::ConsumerConfig;
pub use error::ConfigError;
pub use leadership::LeadershipConfig;
pub use metrics::MetricsConfig;
pub use redelivery::RedeliveryConfig;
pub use redis::RedisKeys;

use constants::DEFAULT_ACKNOWLEDGER_PORT;
use std::str::FromStr;

pub(crate) type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Main configuration structure for the dispatcher
#[derive(Clone, Debug)]
pub struct Config {
    pub redis_url: String,

    /// Identifier written into the leadership lock while this node holds it
    pub node_id: String,

    /// Port the acknowledger binds for consumer ACK connections
    pub acknowledger_port: u16,

    pub rust_log: String,

    // Sub-configurations
    pub leadership: LeadershipConfig,
    pub consumers: ConsumerConfig,
    pub redelivery: RedeliveryConfig,
    pub metrics: MetricsConfig,
    pub redis_keys: RedisKeys,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let redis_url = lookup("REDIS_URL").ok_or(ConfigError::Missing("REDIS_URL"))?;
        if !(redis_url.starts_with("redis://") || redis_url.starts_with("rediss://")) {
            return Err(ConfigError::Invalid {
                name: "REDIS_URL",
                value: redis_url,
                reason: "expected a redis:// or rediss:// URL".to_string(),
            });
        }

        let node_id = lookup("NODE_ID")
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("dispatcher-{}", uuid::Uuid::new_v4()));

        let acknowledger_port = parse_or(lookup, "ACKNOWLEDGER_PORT", DEFAULT_ACKNOWLEDGER_PORT)?;
        if acknowledger_port == 0 {
            return Err(ConfigError::Invalid {
                name: "ACKNOWLEDGER_PORT",
                value: "0".to_string(),
                reason: "must be a fixed port".to_string(),
            });
        }

        Ok(Self {
            redis_url,
            node_id,
            acknowledger_port,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            leadership: LeadershipConfig::from_lookup(lookup)?,
            consumers: ConsumerConfig::from_lookup(lookup)?,
            redelivery: RedeliveryConfig::from_lookup(lookup)?,
            metrics: MetricsConfig::from_lookup(lookup)?,
            redis_keys: RedisKeys::from_lookup(lookup)?,
        })
    }

    /// Redis URL with any credentials masked, for logging
    pub fn redis_url_safe(&self) -> String {
        match self.redis_url.find('@') {
            Some(at_pos) => {
                let protocol_end = self.redis_url.find("://").map(|p| p + 3).unwrap_or(0);
                format!(
                    "{}***{}",
                    &self.redis_url[..protocol_end],
                    &self.redis_url[at_pos..]
                )
            }
            None => self.redis_url.clone(),
        }
    }
}

pub(crate) fn string_or(
    lookup: Lookup<'_>,
    name: &'static str,
    default: &str,
) -> Result<String, ConfigError> {
    match lookup(name) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::Invalid {
            name,
            value,
            reason: "must not be blank".to_string(),
        }),
        Some(value) => Ok(value),
        None => Ok(default.to_string()),
    }
}

pub(crate) fn parse_or<T>(lookup: Lookup<'_>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
