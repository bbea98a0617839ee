//! Database schema constants.
//!
//! All SQL schema definitions for the PostgreSQL audit backend.

/// SQL schema for creating the request-count table.
pub const CREATE_REQUESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fibonacci_requests_metadata (
    number TEXT PRIMARY KEY,
    count BIGINT NOT NULL DEFAULT 0
)
"#;

/// SQL for creating the ranking index used by the most-requested query.
pub const CREATE_REQUESTS_COUNT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_fibonacci_requests_count
ON fibonacci_requests_metadata (count DESC)
"#;

/// Returns all schema statements in application order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![CREATE_REQUESTS_TABLE, CREATE_REQUESTS_COUNT_INDEX]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_statements_are_idempotent() {
        for statement in all_schema_statements() {
            assert!(statement.contains("IF NOT EXISTS"));
        }
    }
}
