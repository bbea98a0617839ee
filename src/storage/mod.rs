//! PostgreSQL persistent storage system.
//!
//! This module provides the request-count audit table and its schema
//! management:
//! - **Database**: PostgreSQL client for recording and ranking requests
//! - **Migrations**: idempotent schema application and versioning

pub mod database;
pub mod migrations;
pub mod schema;

// Re-export main types for convenience
pub use database::{Database, DatabaseError, RequestCount};
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
