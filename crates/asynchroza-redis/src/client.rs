//! Redis-backed coordination store with connection management

use crate::scripts::{DELETE_IF_HOLDER, SET_IF_HOLDER, ZREM_IF_SCORE_AT_MOST};
use crate::store::{CoordinationStore, MessageStream};
use crate::Result;
use futures_util::StreamExt;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::time::Duration;

/// Redis client with automatic reconnection.
///
/// Commands share one multiplexed [`ConnectionManager`]; every subscription gets its
/// own dedicated Pub/Sub connection.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis server
    ///
    /// Supports both redis:// and rediss:// (TLS) URLs
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }

    /// Get connection manager (for advanced operations)
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

#[async_trait::async_trait]
impl CoordinationStore for RedisStore {
    // ============================================================================
    // Scalar keys
    // ============================================================================

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        // (nil) when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.as_deref() == Some("OK"))
    }

    async fn set_if_holder(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let refreshed: i64 = SET_IF_HOLDER
            .key(key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(refreshed == 1)
    }

    async fn delete_if_holder(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = DELETE_IF_HOLDER
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    // ============================================================================
    // Sorted sets
    // ============================================================================

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, max_score: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.zrangebyscore(key, "-inf", max_score).await?;
        Ok(members)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zrem_if_score_at_most(
        &self,
        key: &str,
        member: &str,
        max_score: i64,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = ZREM_IF_SCORE_AT_MOST
            .key(key)
            .arg(member)
            .arg(max_score)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    // ============================================================================
    // Lists
    // ============================================================================

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lrem(key, 1, value).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(key, 0, -1).await?;
        Ok(values)
    }

    // ============================================================================
    // Pub/Sub
    // ============================================================================

    async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let receivers: u64 = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload = match msg.get_payload::<String>() {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        channel = %channel,
                        "Failed to get Pub/Sub message payload"
                    );
                    None
                }
            };
            async move { payload }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    #[serial]
    async fn test_lock_primitives() -> Result<()> {
        let store = RedisStore::connect(&redis_url()).await?;
        let key = "test:asynchroza:lock";
        store.del(key).await?;

        assert!(store.set_if_absent(key, "node-1", Duration::from_secs(10)).await?);
        assert!(!store.set_if_absent(key, "node-2", Duration::from_secs(10)).await?);

        // Non-holder can neither refresh nor release
        assert!(!store.set_if_holder(key, "node-2", Duration::from_secs(60)).await?);
        assert!(!store.delete_if_holder(key, "node-2").await?);

        let mut conn = store.connection();
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        assert!(pttl > 0 && pttl <= 10_000);

        assert!(store.set_if_holder(key, "node-1", Duration::from_secs(60)).await?);
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        assert!(pttl > 10_000);

        assert!(store.delete_if_holder(key, "node-1").await?);
        assert_eq!(store.get(key).await?, None);

        Ok(())
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    #[serial]
    async fn test_sorted_set_primitives() -> Result<()> {
        let store = RedisStore::connect(&redis_url()).await?;
        let key = "test:asynchroza:pending";
        store.del(key).await?;

        store.zadd(key, "old", 100).await?;
        store.zadd(key, "new", 200).await?;

        assert_eq!(store.zrange_by_score(key, 150).await?, vec!["old".to_string()]);
        assert_eq!(store.zcard(key).await?, 2);

        assert!(!store.zrem_if_score_at_most(key, "new", 150).await?);
        assert!(store.zrem_if_score_at_most(key, "old", 150).await?);
        assert!(store.zrem(key, "new").await?);
        assert!(!store.zrem(key, "new").await?);

        Ok(())
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    #[serial]
    async fn test_publish_reaches_subscriber() -> Result<()> {
        let store = RedisStore::connect(&redis_url()).await?;
        let channel = "test:asynchroza:published";

        assert_eq!(store.publish(channel, "nobody").await?, 0);

        let mut stream = store.subscribe(channel).await?;
        assert_eq!(store.publish(channel, "order-42").await?, 1);
        assert_eq!(stream.next().await.as_deref(), Some("order-42"));

        Ok(())
    }
}
