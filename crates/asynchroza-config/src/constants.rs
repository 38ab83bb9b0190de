// ============================================================================
// Configuration Constants
// ============================================================================

// Leadership
pub(crate) const DEFAULT_LEADERSHIP_LOCK_KEY: &str = "leadership_lock";
pub(crate) const DEFAULT_LEADERSHIP_TTL_SECS: u64 = 10;
pub(crate) const DEFAULT_LEADERSHIP_INTERVAL_MS: u64 = 2000;

// Consumers
pub(crate) const DEFAULT_CONSUMER_RECONNECT_INTERVAL_MS: u64 = 2000;
pub(crate) const DEFAULT_CONSUMER_CONNECT_ATTEMPTS: u32 = 3;
pub(crate) const DEFAULT_CONSUMER_CONNECT_BACKOFF_MS: u64 = 200;

// Acknowledger
pub(crate) const DEFAULT_ACKNOWLEDGER_PORT: u16 = 7124;

// Redelivery
pub(crate) const DEFAULT_REDELIVERY_THRESHOLD_SECS: u64 = 5;
pub(crate) const DEFAULT_REDELIVERY_SWEEP_INTERVAL_SECS: u64 = 3;
pub(crate) const DEFAULT_REDELIVERY_MAX_CONSECUTIVE_FAILURES: u32 = 10;
/// Largest threshold whose millisecond value fits a pending-set score
pub(crate) const MAX_REDELIVERY_THRESHOLD_SECS: u64 = (i64::MAX / 1_000) as u64;

// Metrics
pub(crate) const DEFAULT_METRICS_PUSH_INTERVAL_SECS: u64 = 3;

// Coordination store keys and channels
pub(crate) const DEFAULT_PENDING_SET_KEY: &str = "messages:pending";
pub(crate) const DEFAULT_CONSUMER_URLS_KEY: &str = "consumer:urls";
pub(crate) const DEFAULT_PUBLISH_CHANNEL: &str = "messages:published";
