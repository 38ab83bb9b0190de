// ============================================================================
// Leadership Configuration
// ============================================================================

use crate::constants::*;
use crate::{ConfigError, Lookup, parse_or, string_or};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeadershipConfig {
    /// Store key used as the distributed lock
    pub lock_key: String,
    /// Lock expiry; a leader that stops renewing loses the lock after this long
    pub ttl_secs: u64,
    /// Poll interval while follower, renewal interval while leader
    pub interval_ms: u64,
}

impl LeadershipConfig {
    pub(crate) fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let config = Self {
            lock_key: string_or(lookup, "LEADERSHIP_LOCK_KEY", DEFAULT_LEADERSHIP_LOCK_KEY)?,
            ttl_secs: parse_or(lookup, "LEADERSHIP_TTL_SECS", DEFAULT_LEADERSHIP_TTL_SECS)?,
            interval_ms: parse_or(
                lookup,
                "LEADERSHIP_INTERVAL_MS",
                DEFAULT_LEADERSHIP_INTERVAL_MS,
            )?,
        };

        if config.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "LEADERSHIP_INTERVAL_MS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        // The lock has to outlive at least one renewal tick, otherwise a healthy
        // leader would lose it between renewals.
        if config.ttl_secs.saturating_mul(1000) <= config.interval_ms {
            return Err(ConfigError::Invalid {
                name: "LEADERSHIP_TTL_SECS",
                value: config.ttl_secs.to_string(),
                reason: format!(
                    "must exceed the renewal interval of {}ms",
                    config.interval_ms
                ),
            });
        }

        Ok(config)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for LeadershipConfig {
    fn default() -> Self {
        Self {
            lock_key: DEFAULT_LEADERSHIP_LOCK_KEY.to_string(),
            ttl_secs: DEFAULT_LEADERSHIP_TTL_SECS,
            interval_ms: DEFAULT_LEADERSHIP_INTERVAL_MS,
        }
    }
}
