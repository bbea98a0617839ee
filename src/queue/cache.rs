//! Redis-backed value cache and computation frontier.
//!
//! The cache is a hash of index -> value plus a single "max index" marker
//! recording the highest contiguously computed index. Values are only ever
//! added (an index is deleted solely when it is reset on its way to the
//! dead-letter queue), and the marker only advances, via a compare-and-set
//! script, so out-of-order completions from concurrent workers cannot move
//! the frontier backwards.

use std::collections::BTreeMap;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use thiserror::Error;

use crate::fib::Frontier;

/// Lua script that advances the max-index marker only if the candidate is
/// greater than the stored value (or no value is stored yet). Runs as a
/// single atomic unit on the server.
const ADVANCE_MAX_INDEX_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false or tonumber(ARGV[1]) > tonumber(current) then
    redis.call('SET', KEYS[1], ARGV[1])
    return 1
end
return 0
"#;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),
}

/// Redis-backed Fibonacci value cache.
pub struct FibCache {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Key of the index -> value hash.
    values_key: String,
    /// Key of the max-index marker.
    max_index_key: String,
    /// Key of the index -> consecutive-failure-count hash.
    fail_counts_key: String,
    /// Compare-and-set script for the max-index marker.
    advance_script: Script,
}

impl FibCache {
    /// Connects to Redis and creates a new cache handle.
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, prefix))
    }

    /// Creates a cache handle from an existing connection manager.
    ///
    /// Useful when sharing a connection with other components.
    pub fn from_connection(redis: ConnectionManager, prefix: &str) -> Self {
        Self {
            redis,
            values_key: format!("{}:values", prefix),
            max_index_key: format!("{}:max_index", prefix),
            fail_counts_key: format!("{}:fail_counts", prefix),
            advance_script: Script::new(ADVANCE_MAX_INDEX_SCRIPT),
        }
    }

    /// Returns the cached value for an index, if any.
    pub async fn get_value(&self, index: u64) -> Result<Option<u64>, CacheError> {
        let mut conn = self.redis.clone();
        let value: Option<u64> = conn.hget(&self.values_key, index.to_string()).await?;
        Ok(value)
    }

    /// Stores a batch of computed values.
    ///
    /// A no-op for an empty batch.
    pub async fn store_values(&self, values: &BTreeMap<u64, u64>) -> Result<(), CacheError> {
        if values.is_empty() {
            return Ok(());
        }

        let pairs: Vec<(String, u64)> = values.iter().map(|(i, v)| (i.to_string(), *v)).collect();

        let mut conn = self.redis.clone();
        conn.hset_multiple::<_, _, _, ()>(&self.values_key, &pairs)
            .await?;
        Ok(())
    }

    /// Writes the base-case values (`0 -> 0`, `1 -> 1`) into the cache.
    ///
    /// Called once at worker startup so the frontier anchors always exist.
    pub async fn seed_base_values(&self) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.hset_multiple::<_, _, _, ()>(&self.values_key, &[("0", 0u64), ("1", 1u64)])
            .await?;
        Ok(())
    }

    /// Removes a single cached value.
    ///
    /// Used to drop a possibly partial entry when an index is escalated to
    /// the dead-letter queue.
    pub async fn remove_value(&self, index: u64) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.hdel::<_, _, ()>(&self.values_key, index.to_string())
            .await?;
        Ok(())
    }

    /// Reads the current computation frontier.
    ///
    /// Returns `None` when the max-index marker has never been set. When the
    /// marker exists but either anchor value is missing from the hash, the
    /// base-case frontier is returned so the sequence heals itself on the
    /// next computation.
    pub async fn frontier(&self) -> Result<Option<Frontier>, CacheError> {
        let mut conn = self.redis.clone();

        let marker: Option<u64> = conn.get(&self.max_index_key).await?;
        let Some(max_index) = marker else {
            return Ok(None);
        };

        let Some(prev_index) = max_index.checked_sub(1) else {
            return Ok(Some(Frontier::SEED));
        };

        let fields = vec![max_index.to_string(), prev_index.to_string()];
        let anchors: Vec<Option<u64>> = conn.hget(&self.values_key, fields).await?;

        match (anchors.first().copied().flatten(), anchors.get(1).copied().flatten()) {
            (Some(curr), Some(prev)) => Ok(Some(Frontier {
                max_index,
                curr,
                prev,
            })),
            _ => Ok(Some(Frontier::SEED)),
        }
    }

    /// Advances the max-index marker if `index` is greater than the stored
    /// marker. Returns whether the marker moved.
    pub async fn advance_max_index(&self, index: u64) -> Result<bool, CacheError> {
        let mut conn = self.redis.clone();
        let advanced: i64 = self
            .advance_script
            .key(&self.max_index_key)
            .arg(index.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(advanced == 1)
    }

    /// Increments the consecutive-failure counter for an index and returns
    /// the new count.
    pub async fn record_failure(&self, index: u64) -> Result<u64, CacheError> {
        let mut conn = self.redis.clone();
        let count: u64 = conn.hincr(&self.fail_counts_key, index.to_string(), 1).await?;
        Ok(count)
    }

    /// Clears the consecutive-failure counter for an index.
    pub async fn clear_failures(&self, index: u64) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.hdel::<_, _, ()>(&self.fail_counts_key, index.to_string())
            .await?;
        Ok(())
    }

    /// Deletes the value hash, the marker, and the failure counters.
    ///
    /// **Warning**: this permanently discards computed values. Intended for
    /// tests and operator resets.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.del(&self.values_key)
            .del(&self.max_index_key)
            .del(&self.fail_counts_key);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_advance_script_shape() {
        // The script must gate the SET behind the greater-than comparison.
        assert!(ADVANCE_MAX_INDEX_SCRIPT.contains("tonumber(ARGV[1]) > tonumber(current)"));
        assert!(ADVANCE_MAX_INDEX_SCRIPT.contains("redis.call('SET', KEYS[1], ARGV[1])"));
    }
}
