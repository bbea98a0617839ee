//! Worker pool driving claim loops against the shared queue.
//!
//! Each worker runs one claim loop as a single logical thread of control:
//! it blocks on the queue claim, processes the token it receives, and
//! acknowledges on success. Workers coordinate only through Redis; there is
//! no leader and no lock beyond the atomicity of individual operations.
//!
//! # Features
//!
//! - Startup recovery of in-flight jobs from crashed workers
//! - Bounded retry with capped backoff, then dead-letter escalation
//! - Cooperative shutdown via per-worker stop tokens
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::distr::{Alphanumeric, SampleString};
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::fib::{self, FibError, Frontier};

use super::cache::{CacheError, FibCache};
use super::queue::{JobQueue, QueueError};

/// Maximum consecutive failures before an index is dead-lettered.
const MAX_RETRIES: u64 = 3;

/// Per-attempt backoff step.
const BACKOFF_STEP: Duration = Duration::from_millis(300);

/// Ceiling on the retry backoff.
const BACKOFF_CEILING: Duration = Duration::from_millis(1500);

/// Pause after an operational error that has no index attached.
const OP_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Prefix marking a queue token as a stop sentinel.
const STOP_TOKEN_PREFIX: &str = "__STOP__:";

/// Length of the random stop-token suffix.
const STOP_TOKEN_SUFFIX_LEN: usize = 8;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to connect to the job queue.
    #[error("Queue connection failed: {0}")]
    QueueConnection(#[from] QueueError),

    /// Failed to connect to the value cache.
    #[error("Cache connection failed: {0}")]
    CacheConnection(#[from] CacheError),

    /// Failed to open a per-worker Redis connection.
    #[error("Worker connection failed: {0}")]
    WorkerConnection(String),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Errors that can occur while a worker processes a single token.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Cache operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The computation itself failed.
    #[error(transparent)]
    Computation(#[from] FibError),
}

/// Stop sentinel unique to one worker instance.
///
/// The token lives only in memory for the lifetime of the worker; it is
/// never part of the value cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopToken(String);

impl StopToken {
    /// Generates a fresh token with a random suffix.
    pub fn generate() -> Self {
        let suffix = Alphanumeric.sample_string(&mut rand::rng(), STOP_TOKEN_SUFFIX_LEN);
        Self(format!("{}{}", STOP_TOKEN_PREFIX, suffix))
    }

    /// Returns the wire form of the token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Classification of a raw queue token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// The receiving worker's own stop sentinel.
    OwnStop,
    /// A stop sentinel addressed to some other worker.
    ForeignStop,
    /// A job for the given index.
    Index(u64),
    /// Not a stop sentinel and not a non-negative integer.
    Poison,
}

/// Classifies a raw token against the receiving worker's stop token.
pub fn classify(raw: &str, own: &StopToken) -> TokenKind {
    if raw.starts_with(STOP_TOKEN_PREFIX) {
        if raw == own.as_str() {
            return TokenKind::OwnStop;
        }
        return TokenKind::ForeignStop;
    }

    match raw.parse::<u64>() {
        Ok(index) => TokenKind::Index(index),
        Err(_) => TokenKind::Poison,
    }
}

/// Backoff before the next retry of a failed index.
///
/// Grows linearly with the failure count and is capped at the ceiling.
pub fn retry_backoff(failures: u64) -> Duration {
    let millis = (BACKOFF_STEP.as_millis() as u64).saturating_mul(failures);
    Duration::from_millis(millis.min(BACKOFF_CEILING.as_millis() as u64))
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Redis connection URL.
    pub redis_url: String,
    /// Prefix for all queue and cache keys.
    pub key_prefix: String,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "fib".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Sets the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Indices computed and acknowledged.
    pub jobs_completed: u64,
    /// Failure-handler invocations.
    pub jobs_failed: u64,
    /// Tokens discarded as redundant or poison.
    pub jobs_discarded: u64,
}

impl PoolStats {
    /// Returns the total number of tokens that reached a terminal outcome.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed + self.jobs_discarded
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_discarded: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_discarded: AtomicU64::new(0),
        }
    }

    fn record_completion(&self) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
    }

    fn record_discard(&self) {
        self.jobs_discarded.fetch_add(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        PoolStats {
            num_workers,
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            jobs_discarded: self.jobs_discarded.load(Ordering::SeqCst),
        }
    }
}

/// Worker pool that manages claim loops over the shared queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    client: redis::Client,
    /// Control-path queue handle for stop-token delivery. Workers block
    /// their own connections inside the claim, so shutdown needs its own.
    control: JobQueue,
    control_cache: FibCache,
    stop_tokens: Vec<StopToken>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError` if the control connection cannot be established.
    pub async fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| PoolError::WorkerConnection(e.to_string()))?;

        let control_conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| PoolError::WorkerConnection(e.to_string()))?;

        let control = JobQueue::from_connection(control_conn.clone(), &config.key_prefix);
        let control_cache = FibCache::from_connection(control_conn, &config.key_prefix);

        Ok(Self {
            config,
            client,
            control,
            control_cache,
            stop_tokens: Vec::new(),
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        })
    }

    /// Starts all workers in the pool.
    ///
    /// Seeds the base-case values, then spawns one claim loop per worker.
    /// Each worker gets its own Redis connection because the claim blocks
    /// the connection it runs on.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        self.control_cache.seed_base_values().await?;

        for i in 0..self.config.num_workers {
            let conn = ConnectionManager::new(self.client.clone())
                .await
                .map_err(|e| PoolError::WorkerConnection(e.to_string()))?;

            let worker = Worker::new(
                format!("worker-{}", i),
                JobQueue::from_connection(conn.clone(), &self.config.key_prefix),
                FibCache::from_connection(conn, &self.config.key_prefix),
                Arc::clone(&self.stats),
            );

            self.stop_tokens.push(worker.stop_token().clone());

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Pushes each worker's stop token onto the pending queue through the
    /// control connection and returns once every claim loop has consumed
    /// its token, or the timeout expires. Workers finish the job in hand
    /// before observing shutdown; there is no preemption.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        for token in self.stop_tokens.drain(..) {
            if let Err(e) = self.control.requeue_front(token.as_str()).await {
                error!(error = %e, "Failed to enqueue stop token");
            }
        }

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

/// A single worker driving one claim loop.
pub struct Worker {
    /// Unique identifier for this worker.
    id: String,
    /// Queue handle on this worker's own connection.
    queue: JobQueue,
    /// Cache handle on this worker's own connection.
    cache: FibCache,
    /// This worker's stop sentinel.
    stop_token: StopToken,
    /// Shared statistics.
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    /// Creates a new worker with a fresh stop token.
    fn new(id: String, queue: JobQueue, cache: FibCache, stats: Arc<SharedPoolStats>) -> Self {
        Self {
            id,
            queue,
            cache,
            stop_token: StopToken::generate(),
            stats,
        }
    }

    /// Returns this worker's stop token.
    pub fn stop_token(&self) -> &StopToken {
        &self.stop_token
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Main claim loop.
    ///
    /// Recovers in-flight jobs once, then consumes tokens until this
    /// worker's own stop token arrives.
    pub async fn run(self) {
        info!(worker_id = %self.id, "Worker started");

        match self.queue.recover().await {
            Ok(moved) if moved > 0 => {
                info!(worker_id = %self.id, recovered = moved, "Requeued in-flight jobs");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(worker_id = %self.id, error = %e, "In-flight job recovery failed");
            }
        }

        loop {
            let raw = match self.queue.claim().await {
                Ok(raw) => raw,
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to claim a job");
                    tokio::time::sleep(OP_RETRY_DELAY).await;
                    continue;
                }
            };

            match classify(&raw, &self.stop_token) {
                TokenKind::OwnStop => {
                    if let Err(e) = self.queue.ack(&raw).await {
                        warn!(worker_id = %self.id, error = %e, "Failed to acknowledge stop token");
                    }
                    info!(worker_id = %self.id, "Stop token received");
                    break;
                }
                TokenKind::ForeignStop => {
                    if let Err(e) = self.forward_stop(&raw).await {
                        error!(worker_id = %self.id, error = %e, "Failed to forward stop token");
                        tokio::time::sleep(OP_RETRY_DELAY).await;
                    }
                }
                TokenKind::Poison => {
                    warn!(worker_id = %self.id, token = %raw, "Discarding unparseable job token");
                    if let Err(e) = self.queue.ack(&raw).await {
                        error!(worker_id = %self.id, error = %e, "Failed to discard poison token");
                        tokio::time::sleep(OP_RETRY_DELAY).await;
                    }
                    self.stats.record_discard();
                }
                TokenKind::Index(index) => {
                    if let Err(e) = self.process_index(index, &raw).await {
                        self.handle_failure(index, &raw, e).await;
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Re-queues a stop token addressed to another worker so its owner
    /// eventually sees it.
    async fn forward_stop(&self, raw: &str) -> Result<(), WorkerError> {
        self.queue.ack(raw).await?;
        self.queue.requeue_front(raw).await?;
        debug!(worker_id = %self.id, "Forwarded another worker's stop token");
        Ok(())
    }

    /// Processes a claimed index: extend the cache past the frontier, then
    /// acknowledge.
    async fn process_index(&self, index: u64, raw: &str) -> Result<(), WorkerError> {
        let frontier = self.cache.frontier().await?;

        if let Some(f) = frontier {
            if f.max_index >= index {
                debug!(worker_id = %self.id, index, "Index already covered, discarding");
                self.queue.ack(raw).await?;
                self.stats.record_discard();
                return Ok(());
            }
        }

        let start = frontier.unwrap_or(Frontier::SEED);
        let values = fib::extend(start, index)?;

        self.cache.store_values(&values).await?;
        self.cache.advance_max_index(index).await?;
        self.queue.ack(raw).await?;

        if let Err(e) = self.cache.clear_failures(index).await {
            warn!(worker_id = %self.id, index, error = %e, "Failed to reset failure count");
        }

        self.stats.record_completion();
        info!(
            worker_id = %self.id,
            index,
            computed = values.len(),
            "Index computed"
        );
        Ok(())
    }

    /// Routes a failed index through the retry/dead-letter policy.
    ///
    /// Every sub-step here may itself fail; a handler error is logged and
    /// the loop continues after a short pause, never crashing the worker.
    async fn handle_failure(&self, index: u64, raw: &str, err: WorkerError) {
        error!(worker_id = %self.id, index, error = %err, "Job processing failed");
        self.stats.record_failure();

        let outcome: Result<(), WorkerError> = async {
            let failures = self.cache.record_failure(index).await?;

            if failures >= MAX_RETRIES {
                self.cache.remove_value(index).await?;
                self.queue.dead_letter(index).await?;
                self.queue.ack(raw).await?;
                error!(
                    worker_id = %self.id,
                    index,
                    failures,
                    "Index moved to dead-letter queue"
                );
            } else {
                tokio::time::sleep(retry_backoff(failures)).await;
                self.queue.requeue_front(raw).await?;
                self.queue.ack(raw).await?;
                warn!(
                    worker_id = %self.id,
                    index,
                    attempt = failures,
                    max_attempts = MAX_RETRIES,
                    "Index re-queued for retry"
                );
            }

            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            error!(worker_id = %self.id, index, error = %e, "Failure handling error");
            tokio::time::sleep(OP_RETRY_DELAY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_token_shape() {
        let token = StopToken::generate();

        assert!(token.as_str().starts_with(STOP_TOKEN_PREFIX));
        assert_eq!(
            token.as_str().len(),
            STOP_TOKEN_PREFIX.len() + STOP_TOKEN_SUFFIX_LEN
        );
    }

    #[test]
    fn test_stop_tokens_are_unique_per_worker() {
        let a = StopToken::generate();
        let b = StopToken::generate();

        assert_ne!(a, b);
    }

    #[test]
    fn test_classify_own_stop_token() {
        let own = StopToken("__STOP__:abc123".to_string());

        assert_eq!(classify("__STOP__:abc123", &own), TokenKind::OwnStop);
    }

    #[test]
    fn test_classify_foreign_stop_token() {
        let own = StopToken("__STOP__:abc123".to_string());

        assert_eq!(classify("__STOP__:zzz999", &own), TokenKind::ForeignStop);
    }

    #[test]
    fn test_classify_index_token() {
        let own = StopToken::generate();

        assert_eq!(classify("17", &own), TokenKind::Index(17));
        assert_eq!(classify("0", &own), TokenKind::Index(0));
    }

    #[test]
    fn test_classify_poison_tokens() {
        let own = StopToken::generate();

        assert_eq!(classify("", &own), TokenKind::Poison);
        assert_eq!(classify("abc", &own), TokenKind::Poison);
        assert_eq!(classify("-3", &own), TokenKind::Poison);
        assert_eq!(classify("12.5", &own), TokenKind::Poison);
    }

    #[test]
    fn test_retry_backoff_schedule() {
        assert_eq!(retry_backoff(1), Duration::from_millis(300));
        assert_eq!(retry_backoff(2), Duration::from_millis(600));
        assert_eq!(retry_backoff(4), Duration::from_millis(1200));
        assert_eq!(retry_backoff(5), Duration::from_millis(1500));
        assert_eq!(retry_backoff(100), Duration::from_millis(1500));
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();

        assert_eq!(config.num_workers, 1);
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.key_prefix, "fib");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(4)
            .with_redis_url("redis://custom:6380")
            .with_key_prefix("fib_test")
            .with_shutdown_timeout(Duration::from_secs(5));

        assert_eq!(config.num_workers, 4);
        assert_eq!(config.redis_url, "redis://custom:6380");
        assert_eq!(config.key_prefix, "fib_test");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::new();

        stats.record_completion();
        stats.record_completion();
        stats.record_failure();
        stats.record_discard();

        let pool_stats = stats.to_pool_stats(2);

        assert_eq!(pool_stats.num_workers, 2);
        assert_eq!(pool_stats.jobs_completed, 2);
        assert_eq!(pool_stats.jobs_failed, 1);
        assert_eq!(pool_stats.jobs_discarded, 1);
        assert_eq!(pool_stats.total_processed(), 4);
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = PoolError::NotRunning;
        assert!(err.to_string().contains("not running"));

        let err = PoolError::ShutdownTimeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
    }
}
