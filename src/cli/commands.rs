//! CLI command definitions for fibforge.
//!
//! One binary, three roles: the HTTP API server, the worker pool, and the
//! audit-schema migration runner.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::api::{self, ApiState};
use crate::queue::{FibCache, JobQueue, WorkerPool, WorkerPoolConfig};
use crate::storage::Database;

/// Default address the API server binds to.
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

/// Default Redis connection URL.
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Default prefix for all queue and cache keys.
const DEFAULT_KEY_PREFIX: &str = "fib";

/// On-demand Fibonacci computation service.
#[derive(Parser)]
#[command(name = "fibforge")]
#[command(about = "Compute and cache Fibonacci values through a durable Redis work queue")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the HTTP API server.
    Serve(ServeArgs),

    /// Run a pool of queue workers until signalled.
    Work(WorkArgs),

    /// Apply the Postgres audit schema.
    Migrate(MigrateArgs),
}

/// Arguments for `fibforge serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind the API server to.
    #[arg(long, env = "LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,

    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    /// PostgreSQL connection URL for the request audit table.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Prefix for all queue and cache keys.
    #[arg(long, default_value = DEFAULT_KEY_PREFIX)]
    pub key_prefix: String,
}

/// Arguments for `fibforge work`.
#[derive(Parser, Debug)]
pub struct WorkArgs {
    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    /// Prefix for all queue and cache keys.
    #[arg(long, default_value = DEFAULT_KEY_PREFIX)]
    pub key_prefix: String,

    /// Number of workers to run in this process.
    #[arg(short = 'n', long, default_value = "1")]
    pub workers: usize,

    /// Seconds to wait for workers to drain on shutdown.
    #[arg(long, default_value = "30")]
    pub shutdown_timeout: u64,
}

/// Arguments for `fibforge migrate`.
#[derive(Parser, Debug)]
pub struct MigrateArgs {
    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Dispatches a parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Work(args) => run_work(args).await,
        Commands::Migrate(args) => run_migrate(args).await,
    }
}

/// Runs the HTTP API server.
async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address '{}'", args.listen))?;

    let db = Database::connect(&args.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    let client = redis::Client::open(args.redis_url.as_str())
        .context("Invalid Redis URL")?;
    let conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    let queue = JobQueue::from_connection(conn.clone(), &args.key_prefix);
    let cache = FibCache::from_connection(conn, &args.key_prefix);

    let state = Arc::new(ApiState::new(queue, cache, db));
    api::serve(state, addr).await.context("API server failed")?;

    Ok(())
}

/// Runs the worker pool until a termination signal arrives.
async fn run_work(args: WorkArgs) -> anyhow::Result<()> {
    let config = WorkerPoolConfig::new(args.workers)
        .with_redis_url(args.redis_url)
        .with_key_prefix(args.key_prefix)
        .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout));

    let mut pool = WorkerPool::new(config)
        .await
        .context("Failed to connect to Redis")?;

    pool.start().await.context("Failed to start worker pool")?;

    shutdown_signal().await;
    info!("Termination signal received");

    pool.shutdown().await.context("Worker pool shutdown failed")?;

    let stats = pool.stats();
    info!(
        completed = stats.jobs_completed,
        failed = stats.jobs_failed,
        discarded = stats.jobs_discarded,
        "Worker pool exited"
    );

    Ok(())
}

/// Applies the audit schema.
async fn run_migrate(args: MigrateArgs) -> anyhow::Result<()> {
    let db = Database::connect(&args.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    db.run_migrations().await.context("Migrations failed")?;
    info!("Migrations applied");

    Ok(())
}

/// Completes when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
