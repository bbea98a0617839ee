//! fibforge: on-demand Fibonacci computation over a durable Redis work queue.
//!
//! This library provides the queue-coordination and incremental-computation
//! engine, the worker pool that drives it, the HTTP API surface, and the
//! request audit storage.

// Core modules
pub mod api;
pub mod cli;
pub mod fib;
pub mod queue;
pub mod storage;

// Re-export commonly used types
pub use fib::{FibError, Frontier};
pub use queue::{
    CacheError, FibCache, JobQueue, PoolError, QueueError, Worker, WorkerPool, WorkerPoolConfig,
};
pub use storage::{Database, DatabaseError};
