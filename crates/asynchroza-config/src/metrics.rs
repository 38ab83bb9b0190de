// ============================================================================
// Metrics Configuration
// ============================================================================

use crate::constants::*;
use crate::{ConfigError, Lookup, parse_or};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Prometheus Pushgateway; pushing is disabled when unset
    pub pushgateway_url: Option<String>,
    pub push_interval_secs: u64,
}

impl MetricsConfig {
    pub(crate) fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            pushgateway_url: lookup("PUSHGATEWAY_URL").filter(|url| !url.trim().is_empty()),
            push_interval_secs: parse_or(
                lookup,
                "METRICS_PUSH_INTERVAL_SECS",
                DEFAULT_METRICS_PUSH_INTERVAL_SECS,
            )?,
        })
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs.max(1))
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            pushgateway_url: None,
            push_interval_secs: DEFAULT_METRICS_PUSH_INTERVAL_SECS,
        }
    }
}
