//! Integration tests for the queue core.
//!
//! These tests run against a real Redis instance.
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --test queue_integration -- --ignored

use std::time::Duration;

use fibforge::fib::Frontier;
use fibforge::queue::{FibCache, JobQueue, WorkerPool, WorkerPoolConfig};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Connects queue and cache handles under an isolated key prefix and wipes
/// any state a previous run left behind.
async fn clean_handles(prefix: &str) -> (JobQueue, FibCache) {
    let queue = JobQueue::connect(&redis_url(), prefix)
        .await
        .expect("Redis must be reachable for integration tests");
    let cache = FibCache::connect(&redis_url(), prefix)
        .await
        .expect("Redis must be reachable for integration tests");

    queue.clear().await.expect("should clear queue keys");
    cache.clear().await.expect("should clear cache keys");

    (queue, cache)
}

/// Polls `probe` every 100ms until it returns true or the timeout expires.
async fn wait_until<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test --test queue_integration -- --ignored
async fn test_enqueue_if_absent_dedups_pending_entries() {
    let (queue, _cache) = clean_handles("fib_it_dedup").await;

    assert!(queue.enqueue_if_absent(7).await.expect("first enqueue"));
    assert!(!queue.enqueue_if_absent(7).await.expect("second enqueue"));

    assert_eq!(queue.len().await.expect("len"), 1);
}

#[tokio::test]
#[ignore]
async fn test_enqueue_if_absent_skips_cached_and_claimed_indices() {
    let (queue, cache) = clean_handles("fib_it_dedup_cached").await;

    cache.seed_base_values().await.expect("seed");
    assert!(
        !queue.enqueue_if_absent(1).await.expect("enqueue"),
        "a cached index must not be enqueued"
    );

    assert!(queue.enqueue_if_absent(9).await.expect("enqueue"));
    let token = queue.claim().await.expect("claim");
    assert_eq!(token, "9");
    assert!(
        !queue.enqueue_if_absent(9).await.expect("enqueue"),
        "an in-processing index must not be enqueued"
    );
}

#[tokio::test]
#[ignore]
async fn test_recovery_requeues_in_flight_jobs() {
    let (queue, _cache) = clean_handles("fib_it_recovery").await;

    assert!(queue.enqueue_if_absent(5).await.expect("enqueue"));
    let token = queue.claim().await.expect("claim");
    assert_eq!(token, "5");
    assert_eq!(queue.processing_len().await.expect("processing len"), 1);

    // A crashed worker never acknowledges; the next recovery pass must put
    // the token back where a live worker can claim it.
    let moved = queue.recover().await.expect("recover");
    assert_eq!(moved, 1);
    assert_eq!(queue.len().await.expect("len"), 1);
    assert_eq!(queue.processing_len().await.expect("processing len"), 0);
}

#[tokio::test]
#[ignore]
async fn test_worker_computes_requested_index() {
    let prefix = "fib_it_compute";
    let (queue, cache) = clean_handles(prefix).await;

    let config = WorkerPoolConfig::new(1)
        .with_redis_url(redis_url())
        .with_key_prefix(prefix)
        .with_shutdown_timeout(Duration::from_secs(10));
    let mut pool = WorkerPool::new(config).await.expect("pool");
    pool.start().await.expect("start");

    assert!(queue.enqueue_if_absent(10).await.expect("enqueue"));

    let computed = wait_until(Duration::from_secs(5), || async {
        cache.get_value(10).await.expect("get_value") == Some(55)
    })
    .await;
    assert!(computed, "worker should compute fib(10) = 55");

    let frontier = cache.frontier().await.expect("frontier");
    assert_eq!(
        frontier,
        Some(Frontier {
            max_index: 10,
            curr: 55,
            prev: 34
        })
    );

    pool.shutdown().await.expect("shutdown");
}

#[tokio::test]
#[ignore]
async fn test_redundant_index_is_discarded() {
    let prefix = "fib_it_redundant";
    let (queue, cache) = clean_handles(prefix).await;

    let config = WorkerPoolConfig::new(1)
        .with_redis_url(redis_url())
        .with_key_prefix(prefix)
        .with_shutdown_timeout(Duration::from_secs(10));
    let mut pool = WorkerPool::new(config).await.expect("pool");
    pool.start().await.expect("start");

    assert!(queue.enqueue_if_absent(10).await.expect("enqueue"));
    let computed = wait_until(Duration::from_secs(5), || async {
        cache.get_value(10).await.expect("get_value").is_some()
    })
    .await;
    assert!(computed);

    // The frontier is already past 5, so this job is redundant work.
    assert!(queue.enqueue_if_absent(5).await.expect("enqueue"));
    let drained = wait_until(Duration::from_secs(5), || async {
        queue.len().await.expect("len") == 0 && queue.processing_len().await.expect("plen") == 0
    })
    .await;
    assert!(drained, "redundant job should be consumed and discarded");

    assert_eq!(cache.get_value(5).await.expect("get_value"), Some(5));
    assert!(pool.stats().jobs_discarded >= 1);

    pool.shutdown().await.expect("shutdown");
}

#[tokio::test]
#[ignore]
async fn test_failing_index_exhausts_retries_into_dead_letter() {
    let prefix = "fib_it_dead_letter";
    let (queue, _cache) = clean_handles(prefix).await;

    let config = WorkerPoolConfig::new(1)
        .with_redis_url(redis_url())
        .with_key_prefix(prefix)
        .with_shutdown_timeout(Duration::from_secs(10));
    let mut pool = WorkerPool::new(config).await.expect("pool");
    pool.start().await.expect("start");

    // 100 is past the representable range, so every attempt fails and the
    // retry budget drains: two backoffs, then dead-letter.
    assert!(queue.enqueue_if_absent(100).await.expect("enqueue"));

    let dead_lettered = wait_until(Duration::from_secs(10), || async {
        queue.dead_letter_len().await.expect("dlq len") == 1
    })
    .await;
    assert!(dead_lettered, "index 100 should land in the dead-letter queue");

    let items = queue.peek_dead_letter(0, -1).await.expect("peek");
    assert_eq!(items, vec!["100".to_string()]);
    assert_eq!(queue.len().await.expect("len"), 0);
    assert_eq!(queue.processing_len().await.expect("processing len"), 0);

    pool.shutdown().await.expect("shutdown");
}

#[tokio::test]
#[ignore]
async fn test_foreign_stop_token_is_forwarded_not_consumed() {
    let prefix = "fib_it_stop_forward";
    let (queue, _cache) = clean_handles(prefix).await;

    let config = WorkerPoolConfig::new(1)
        .with_redis_url(redis_url())
        .with_key_prefix(prefix)
        .with_shutdown_timeout(Duration::from_secs(10));
    let mut pool = WorkerPool::new(config).await.expect("pool");
    pool.start().await.expect("start");

    // A stop token addressed to some other worker instance: this pool's
    // worker must keep re-queueing it rather than terminating on it.
    queue
        .requeue_front("__STOP__:abc123")
        .await
        .expect("push foreign stop token");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(pool.is_running());

    pool.shutdown().await.expect("shutdown");

    // The worker consumed its own token and left the foreign one behind.
    let leftover = tokio::time::timeout(Duration::from_secs(5), queue.claim())
        .await
        .expect("foreign stop token should still be claimable")
        .expect("claim");
    assert_eq!(leftover, "__STOP__:abc123");
}
