// ============================================================================
// Redelivery Configuration
// ============================================================================

use crate::constants::*;
use crate::{ConfigError, Lookup, parse_or};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedeliveryConfig {
    /// Age after which an unacknowledged message is republished
    pub threshold_secs: u64,
    /// How often the republisher sweeps the pending set
    pub sweep_interval_secs: u64,
    /// Consecutive failed sweeps before the republisher gives up
    pub max_consecutive_failures: u32,
}

impl RedeliveryConfig {
    pub(crate) fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let sweep_interval_secs = parse_or(
            lookup,
            "REDELIVERY_SWEEP_INTERVAL_SECS",
            DEFAULT_REDELIVERY_SWEEP_INTERVAL_SECS,
        )?;
        if sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "REDELIVERY_SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let threshold_secs: u64 = parse_or(
            lookup,
            "REDELIVERY_THRESHOLD_SECS",
            DEFAULT_REDELIVERY_THRESHOLD_SECS,
        )?;
        // Pending scores are i64 epoch millis
        if threshold_secs > MAX_REDELIVERY_THRESHOLD_SECS {
            return Err(ConfigError::Invalid {
                name: "REDELIVERY_THRESHOLD_SECS",
                value: threshold_secs.to_string(),
                reason: format!("must be at most {MAX_REDELIVERY_THRESHOLD_SECS}"),
            });
        }

        Ok(Self {
            threshold_secs,
            sweep_interval_secs,
            max_consecutive_failures: parse_or(
                lookup,
                "REDELIVERY_MAX_CONSECUTIVE_FAILURES",
                DEFAULT_REDELIVERY_MAX_CONSECUTIVE_FAILURES,
            )?,
        })
    }

    pub fn threshold(&self) -> Duration {
        Duration::from_secs(self.threshold_secs)
    }

    /// Threshold in milliseconds, saturating at `i64::MAX`
    pub fn threshold_millis(&self) -> i64 {
        i64::try_from(self.threshold().as_millis()).unwrap_or(i64::MAX)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RedeliveryConfig {
    fn default() -> Self {
        Self {
            threshold_secs: DEFAULT_REDELIVERY_THRESHOLD_SECS,
            sweep_interval_secs: DEFAULT_REDELIVERY_SWEEP_INTERVAL_SECS,
            max_consecutive_failures: DEFAULT_REDELIVERY_MAX_CONSECUTIVE_FAILURES,
        }
    }
}
