//! Redis-based job queue with reliable dequeue.
//!
//! This module provides the durable queue that coordinates producers and
//! workers:
//!
//! - Atomic check-and-enqueue so an index is never queued twice
//! - Atomic claim using BRPOPLPUSH
//! - Crash recovery by draining the processing list back into the queue
//! - Dead-letter list for indices that exhausted their retry budget
//!
//! # Queue Structure
//!
//! Four Redis keys share a common prefix:
//!
//! - `{prefix}:queue`: pending job tokens, FIFO
//! - `{prefix}:processing`: tokens claimed but not yet acknowledged
//! - `{prefix}:dead_letter`: indices that failed past the retry budget
//! - `{prefix}:values`: the value cache, consulted by the dedup enqueue
//!
//! # Reliability
//!
//! A claim atomically moves the token from the queue to the processing
//! list. If a worker crashes mid-job, the token survives in the processing
//! list and is requeued by the next worker's recovery pass, so delivery is
//! at-least-once.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use thiserror::Error;

/// Lua script implementing the atomic check-and-enqueue. The index is
/// pushed only when it is neither cached, pending, nor in processing;
/// returns 1 on enqueue and 0 on no-op.
const ENQUEUE_IF_ABSENT_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
    return 0
end
for _, token in ipairs(redis.call('LRANGE', KEYS[2], 0, -1)) do
    if token == ARGV[1] then
        return 0
    end
end
for _, token in ipairs(redis.call('LRANGE', KEYS[3], 0, -1)) do
    if token == ARGV[1] then
        return 0
    end
end
redis.call('LPUSH', KEYS[2], ARGV[1])
return 1
"#;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),
}

/// Well-known key names derived from a queue prefix.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    /// Pending queue list.
    pub queue: String,
    /// Processing list.
    pub processing: String,
    /// Dead-letter list.
    pub dead_letter: String,
    /// Value-cache hash (read by the dedup enqueue).
    pub values: String,
}

impl QueueKeys {
    /// Builds the key set for a prefix.
    pub fn new(prefix: &str) -> Self {
        Self {
            queue: format!("{}:queue", prefix),
            processing: format!("{}:processing", prefix),
            dead_letter: format!("{}:dead_letter", prefix),
            values: format!("{}:values", prefix),
        }
    }
}

/// Redis-based job queue with reliable dequeue.
///
/// Tokens are enqueued with LPUSH and claimed with BRPOPLPUSH, so the
/// pending list is FIFO per producer. Retries and stop-token forwarding
/// re-push with RPUSH, placing the token at the consuming end.
pub struct JobQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Key names for this queue.
    keys: QueueKeys,
    /// Check-and-enqueue script.
    enqueue_script: Script,
}

impl JobQueue {
    /// Connects to Redis and creates a new job queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, prefix))
    }

    /// Creates a queue handle from an existing connection manager.
    ///
    /// Each worker holds its own connection because the claim blocks it;
    /// producers and the control path can share one.
    pub fn from_connection(redis: ConnectionManager, prefix: &str) -> Self {
        Self {
            redis,
            keys: QueueKeys::new(prefix),
            enqueue_script: Script::new(ENQUEUE_IF_ABSENT_SCRIPT),
        }
    }

    /// Enqueues an index unless it is already cached, pending, or being
    /// processed. Returns whether a new job was actually enqueued.
    ///
    /// The check and the push run as one atomic script so concurrent
    /// producers racing on the same index cannot enqueue it twice.
    pub async fn enqueue_if_absent(&self, index: u64) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let enqueued: i64 = self
            .enqueue_script
            .key(&self.keys.values)
            .key(&self.keys.queue)
            .key(&self.keys.processing)
            .arg(index.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(enqueued == 1)
    }

    /// Claims the next job token, blocking until one is available.
    ///
    /// BRPOPLPUSH atomically moves the token from the pending queue to the
    /// processing list, so a worker crash between claim and acknowledge
    /// leaves the token recoverable.
    pub async fn claim(&self) -> Result<String, QueueError> {
        let mut conn = self.redis.clone();

        let token: String = redis::cmd("BRPOPLPUSH")
            .arg(&self.keys.queue)
            .arg(&self.keys.processing)
            .arg(0)
            .query_async(&mut conn)
            .await?;

        Ok(token)
    }

    /// Acknowledges a claimed token by removing it from the processing
    /// list. Removing a token that is no longer present is not an error.
    pub async fn ack(&self, token: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.lrem::<_, _, ()>(&self.keys.processing, 1, token).await?;
        Ok(())
    }

    /// Re-pushes a token at the consuming end of the pending queue so it is
    /// picked up next. Used for retries and stop-token forwarding.
    pub async fn requeue_front(&self, token: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(&self.keys.queue, token).await?;
        Ok(())
    }

    /// Pushes an index onto the dead-letter list.
    pub async fn dead_letter(&self, index: u64) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(&self.keys.dead_letter, index.to_string())
            .await?;
        Ok(())
    }

    /// Drains the processing list back into the pending queue, one element
    /// at a time, until it reads empty.
    ///
    /// Run once per worker start. Repairs tokens left behind by a worker
    /// that crashed between claim and acknowledge; tolerates producers and
    /// other workers running concurrently.
    ///
    /// # Returns
    ///
    /// The number of tokens moved back.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut moved = 0;

        loop {
            let len: usize = conn.llen(&self.keys.processing).await?;
            if len == 0 {
                break;
            }

            let token: Option<String> = conn
                .rpoplpush(&self.keys.processing, &self.keys.queue)
                .await?;
            if token.is_none() {
                break;
            }
            moved += 1;
        }

        Ok(moved)
    }

    /// Returns the number of pending jobs.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.keys.queue).await?;
        Ok(len)
    }

    /// Returns the number of jobs currently claimed but unacknowledged.
    pub async fn processing_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.keys.processing).await?;
        Ok(len)
    }

    /// Returns the number of dead-lettered indices.
    pub async fn dead_letter_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.keys.dead_letter).await?;
        Ok(len)
    }

    /// Returns whether the pending queue is empty.
    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Reads a window of the dead-letter list without removing entries.
    pub async fn peek_dead_letter(
        &self,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, QueueError> {
        let mut conn = self.redis.clone();
        let items: Vec<String> = conn.lrange(&self.keys.dead_letter, start, stop).await?;
        Ok(items)
    }

    /// Deletes the pending, processing, and dead-letter lists.
    ///
    /// **Warning**: this permanently discards queued work. Intended for
    /// tests and operator resets.
    pub async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.del(&self.keys.queue)
            .del(&self.keys.processing)
            .del(&self.keys.dead_letter);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Returns queue statistics.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (pending, processing, dead_letter) = tokio::try_join!(
            self.len(),
            self.processing_len(),
            self.dead_letter_len()
        )?;

        Ok(QueueStats {
            pending_jobs: pending,
            processing_jobs: processing,
            dead_letter_jobs: dead_letter,
        })
    }
}

/// Statistics about queue state.
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Number of jobs waiting to be claimed.
    pub pending_jobs: usize,
    /// Number of jobs claimed but not yet acknowledged.
    pub processing_jobs: usize,
    /// Number of indices in the dead-letter list.
    pub dead_letter_jobs: usize,
}

impl QueueStats {
    /// Returns the total number of jobs across all lists.
    pub fn total_jobs(&self) -> usize {
        self.pending_jobs + self.processing_jobs + self.dead_letter_jobs
    }
}
