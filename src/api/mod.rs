//! HTTP API layer.
//!
//! A thin surface over the queue/cache interface and the request audit
//! table. All computation happens in the workers; the API only validates
//! input, reads the cache, enqueues work, and exposes the dead-letter
//! queue for operators.

mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use crate::queue::{FibCache, JobQueue};
use crate::storage::Database;

pub use routes::ApiError;

/// Shared state handed to every request handler.
pub struct ApiState {
    /// Queue handle used for enqueueing and dead-letter reads.
    pub queue: JobQueue,
    /// Value-cache handle for lookups.
    pub cache: FibCache,
    /// Request audit database.
    pub db: Database,
}

impl ApiState {
    /// Creates the shared API state.
    pub fn new(queue: JobQueue, cache: FibCache, db: Database) -> Self {
        Self { queue, cache, db }
    }
}

/// Builds the API router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(
            "/api/fibonacci/calculated/{index}",
            get(routes::get_calculated),
        )
        .route(
            "/api/fibonacci/calculate/{index}",
            post(routes::request_calculation),
        )
        .route("/api/fibonacci/most-requested", get(routes::most_requested))
        .route("/api/ops/deadletter/len", get(routes::dead_letter_len))
        .route("/api/ops/deadletter", get(routes::dead_letter_range))
        .with_state(state)
}

/// Binds the listener and serves the API until the process is signalled.
pub async fn serve(state: Arc<ApiState>, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, stopping API server");
        })
        .await
}
