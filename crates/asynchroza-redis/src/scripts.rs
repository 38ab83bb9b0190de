// ============================================================================
// Lua Scripts
// ============================================================================
//
// Conditional writes Redis has no single command for. Each script runs
// atomically on the server.
//
// ============================================================================

use once_cell::sync::Lazy;
use redis::Script;

/// Refresh the lock expiry only while we still hold it.
/// KEYS[1] = lock key, ARGV[1] = holder id, ARGV[2] = ttl in ms
pub(crate) static SET_IF_HOLDER: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
            return 1
        end
        return 0
        "#,
    )
});

/// Release the lock only if we hold it.
/// KEYS[1] = lock key, ARGV[1] = holder id
pub(crate) static DELETE_IF_HOLDER: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0
        "#,
    )
});

/// Remove a sorted set member only while its score is at or below the cutoff.
/// KEYS[1] = set key, ARGV[1] = member, ARGV[2] = max score
pub(crate) static ZREM_IF_SCORE_AT_MOST: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
        if score and tonumber(score) <= tonumber(ARGV[2]) then
            return redis.call('ZREM', KEYS[1], ARGV[1])
        end
        return 0
        "#,
    )
});
