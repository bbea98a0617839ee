//! Queue coordination and incremental computation over Redis.
//!
//! This module is the heart of the service: a durable queue that feeds
//! worker claim loops, a value cache with a monotonic computation frontier,
//! and the retry/dead-letter policy around them.
//!
//! - **JobQueue**: Redis lists with atomic dedup enqueue and BRPOPLPUSH claim
//! - **FibCache**: index -> value hash plus the compare-and-set frontier marker
//! - **WorkerPool** / **Worker**: claim loops with crash recovery and
//!   stop-token shutdown
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │  (API layer) │
//!                      └──────┬───────┘
//!                             │ enqueue_if_absent
//!                      ┌──────▼───────┐
//!                      │    Redis     │
//!                      │ queue + cache│
//!                      └──────┬───────┘
//!                             │ BRPOPLPUSH
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Reliability Features
//!
//! - **Atomic dedup**: a Lua script checks cache, pending, and processing
//!   before enqueueing, so racing producers cannot duplicate an index
//! - **Atomic claim**: BRPOPLPUSH moves tokens into the processing list, and
//!   a crashed worker's tokens are requeued by the next recovery pass
//! - **Idempotent convergence**: delivery is at-least-once; the frontier
//!   marker check discards work another worker already finished
//! - **Dead-letter queue**: an index failing three consecutive times is
//!   parked for manual inspection
//! - **Cooperative shutdown**: each worker consumes its own stop token and
//!   forwards tokens addressed to its peers

pub mod cache;
pub mod queue;
pub mod worker;

// Re-export main types for convenience
pub use cache::{CacheError, FibCache};
pub use queue::{JobQueue, QueueError, QueueKeys, QueueStats};
pub use worker::{
    classify, retry_backoff, PoolError, PoolStats, StopToken, TokenKind, Worker, WorkerError,
    WorkerPool, WorkerPoolConfig,
};
