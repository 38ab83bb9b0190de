// ============================================================================
// Consumer Pool Configuration
// ============================================================================

use crate::constants::*;
use crate::{ConfigError, Lookup, parse_or};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Consumer endpoints in round-robin order (host:port or ws:// URL)
    pub urls: Vec<String>,
    /// How often dead endpoints are reconnected
    pub reconnect_interval_ms: u64,
    /// Connection attempts per establish before the endpoint is marked dead
    pub connect_attempts: u32,
    /// Base backoff between connection attempts, doubled per attempt
    pub connect_backoff_ms: u64,
}

impl ConsumerConfig {
    pub(crate) fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let raw = lookup("CONSUMER_URLS").ok_or(ConfigError::Missing("CONSUMER_URLS"))?;
        let urls = parse_url_list(&raw);
        if urls.is_empty() {
            return Err(ConfigError::Invalid {
                name: "CONSUMER_URLS",
                value: raw,
                reason: "at least one consumer endpoint is required".to_string(),
            });
        }

        let connect_attempts = parse_or(
            lookup,
            "CONSUMER_CONNECT_ATTEMPTS",
            DEFAULT_CONSUMER_CONNECT_ATTEMPTS,
        )?;
        if connect_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "CONSUMER_CONNECT_ATTEMPTS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let reconnect_interval_ms = parse_or(
            lookup,
            "CONSUMER_RECONNECT_INTERVAL_MS",
            DEFAULT_CONSUMER_RECONNECT_INTERVAL_MS,
        )?;
        if reconnect_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "CONSUMER_RECONNECT_INTERVAL_MS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            urls,
            reconnect_interval_ms,
            connect_attempts,
            connect_backoff_ms: parse_or(
                lookup,
                "CONSUMER_CONNECT_BACKOFF_MS",
                DEFAULT_CONSUMER_CONNECT_BACKOFF_MS,
            )?,
        })
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}

/// Split a comma separated endpoint list, dropping blanks and duplicates while keeping
/// the first occurrence's position.
fn parse_url_list(raw: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for url in raw.split(',').map(str::trim).filter(|u| !u.is_empty()) {
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
    }
    urls
}
