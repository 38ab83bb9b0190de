use crate::Result;
use futures_util::stream::BoxStream;
use std::time::Duration;

/// Stream of payloads received on a Pub/Sub channel. Ends when the subscription is lost.
pub type MessageStream = BoxStream<'static, String>;

/// Atomic primitives the dispatcher consumes from the coordination store.
///
/// Implementations must make every method a single atomic operation on the store;
/// callers never combine them under a client-side lock.
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    // ========================================================================
    // Scalar keys
    // ========================================================================

    /// GET - current value of `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// SET NX PX - set `key` to `value` only if it does not exist.
    /// Returns whether the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Rewrite `key` with a fresh expiry only if it currently holds `value`.
    /// Returns whether the key was refreshed.
    async fn set_if_holder(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if it currently holds `value`.
    async fn delete_if_holder(&self, key: &str, value: &str) -> Result<bool>;

    /// DEL - drop `key` whatever its type
    async fn del(&self, key: &str) -> Result<()>;

    // ========================================================================
    // Sorted sets
    // ========================================================================

    /// ZADD - insert `member` (or update its score)
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()>;

    /// ZRANGEBYSCORE -inf max - members with score <= `max_score`, lowest first
    async fn zrange_by_score(&self, key: &str, max_score: i64) -> Result<Vec<String>>;

    /// ZREM - remove `member`; returns whether it was present
    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;

    /// Remove `member` only while its score is still <= `max_score`
    async fn zrem_if_score_at_most(&self, key: &str, member: &str, max_score: i64)
    -> Result<bool>;

    /// ZCARD - number of members
    async fn zcard(&self, key: &str) -> Result<u64>;

    // ========================================================================
    // Lists
    // ========================================================================

    /// LPUSH - push to head of list
    async fn lpush(&self, key: &str, value: &str) -> Result<()>;

    /// LREM key 1 value - remove the first occurrence of `value`
    async fn lrem(&self, key: &str, value: &str) -> Result<()>;

    /// LRANGE key 0 -1 - whole list, head first
    async fn lrange(&self, key: &str) -> Result<Vec<String>>;

    // ========================================================================
    // Pub/Sub
    // ========================================================================

    /// PUBLISH - returns the number of subscribers that received the message
    async fn publish(&self, channel: &str, payload: &str) -> Result<u64>;

    /// SUBSCRIBE - open a dedicated subscription on `channel`
    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;
}
