//! Command-line interface for fibforge.
//!
//! Provides the API server, worker pool, and migration commands.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
