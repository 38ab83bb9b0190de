// ============================================================================
// Coordination Store Keys
// ============================================================================

use crate::constants::*;
use crate::{ConfigError, Lookup, string_or};

/// Names of everything the dispatcher keeps in the coordination store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisKeys {
    /// Sorted set of in-flight payloads scored by enqueue time (ms)
    pub pending_set: String,
    /// List mirroring the currently connected consumer endpoints
    pub consumer_urls: String,
    /// Pub/Sub channel carrying published messages
    pub publish_channel: String,
}

impl RedisKeys {
    pub(crate) fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            pending_set: string_or(lookup, "REDIS_KEY_PENDING_SET", DEFAULT_PENDING_SET_KEY)?,
            consumer_urls: string_or(
                lookup,
                "REDIS_KEY_CONSUMER_URLS",
                DEFAULT_CONSUMER_URLS_KEY,
            )?,
            publish_channel: string_or(
                lookup,
                "REDIS_CHANNEL_PUBLISHED",
                DEFAULT_PUBLISH_CHANNEL,
            )?,
        })
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self {
            pending_set: DEFAULT_PENDING_SET_KEY.to_string(),
            consumer_urls: DEFAULT_CONSUMER_URLS_KEY.to_string(),
            publish_channel: DEFAULT_PUBLISH_CHANNEL.to_string(),
        }
    }
}
