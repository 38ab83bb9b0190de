use asynchroza_redis::{CoordinationStore, Result};
use std::sync::Arc;

/// Milliseconds since the Unix epoch, the score of a pending entry
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Messages handed to a consumer but not yet acknowledged.
///
/// Backed by a sorted set scored by enqueue time, so stale entries come out oldest
/// first. Entries are keyed by payload: two identical payloads in flight share one
/// entry and the first ACK clears both.
#[derive(Clone)]
pub struct PendingMessageStore {
    store: Arc<dyn CoordinationStore>,
    key: String,
}

impl PendingMessageStore {
    pub fn new(store: Arc<dyn CoordinationStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record `message` as in flight since `timestamp_ms`
    ///
    /// Re-adding an existing payload moves its timestamp forward.
    pub async fn add(&self, message: &str, timestamp_ms: i64) -> Result<()> {
        self.store.zadd(&self.key, message, timestamp_ms).await
    }

    /// Remove `message`; returns whether it was pending
    pub async fn remove(&self, message: &str) -> Result<bool> {
        self.store.zrem(&self.key, message).await
    }

    /// Entries enqueued at or before `cutoff_ms`, oldest first
    pub async fn older_than(&self, cutoff_ms: i64) -> Result<Vec<String>> {
        self.store.zrange_by_score(&self.key, cutoff_ms).await
    }

    /// Remove `message` only if it was not re-added after `cutoff_ms`
    pub async fn remove_if_older(&self, message: &str, cutoff_ms: i64) -> Result<bool> {
        self.store
            .zrem_if_score_at_most(&self.key, message, cutoff_ms)
            .await
    }

    pub async fn count(&self) -> Result<u64> {
        self.store.zcard(&self.key).await
    }

    /// Drop every pending entry
    pub async fn clear(&self) -> Result<()> {
        self.store.del(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asynchroza_redis::MemoryStore;

    fn pending() -> PendingMessageStore {
        PendingMessageStore::new(Arc::new(MemoryStore::new()), "messages:pending")
    }

    #[tokio::test]
    async fn test_older_than_is_ordered_and_inclusive() {
        let pending = pending();
        pending.add("second", 2_000).await.unwrap();
        pending.add("first", 1_000).await.unwrap();
        pending.add("fresh", 9_000).await.unwrap();

        assert_eq!(
            pending.older_than(2_000).await.unwrap(),
            vec!["first".to_string(), "second".to_string()]
        );
        assert_eq!(pending.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_identical_payloads_share_an_entry() {
        let pending = pending();
        pending.add("order-42", 1_000).await.unwrap();
        pending.add("order-42", 5_000).await.unwrap();

        assert_eq!(pending.count().await.unwrap(), 1);
        assert!(pending.older_than(1_000).await.unwrap().is_empty());

        assert!(pending.remove("order-42").await.unwrap());
        assert!(!pending.remove("order-42").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_if_older_keeps_readded_entry() {
        let pending = pending();
        pending.add("order-42", 1_000).await.unwrap();

        // Re-added by a fresh delivery after the sweep picked it up
        pending.add("order-42", 8_000).await.unwrap();
        assert!(!pending.remove_if_older("order-42", 5_000).await.unwrap());
        assert_eq!(pending.count().await.unwrap(), 1);

        assert!(pending.remove_if_older("order-42", 8_000).await.unwrap());
        assert_eq!(pending.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let pending = pending();
        pending.add("a", 1).await.unwrap();
        pending.add("b", 2).await.unwrap();

        pending.clear().await.unwrap();
        assert_eq!(pending.count().await.unwrap(), 0);
    }
}
