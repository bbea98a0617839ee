//! Request handlers and input validation.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use crate::queue::{CacheError, QueueError};
use crate::storage::DatabaseError;

use super::ApiState;

/// Largest index clients may request.
const MAX_REQUESTED_INDEX: u64 = 40;

/// Maximum number of dead-letter entries returned per read.
const DEAD_LETTER_PAGE_SIZE: i64 = 50;

/// Errors surfaced to API clients.
#[derive(Debug)]
pub enum ApiError {
    /// The request failed validation.
    UnprocessableEntity(String),
    /// A downstream store operation failed.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::UnprocessableEntity(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": message })),
            )
                .into_response(),
            ApiError::Internal(message) => {
                error!(error = %message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Validates a raw index path parameter.
fn parse_index(raw: &str) -> Result<u64, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::UnprocessableEntity("Index is required".to_string()));
    }

    let value: i64 = trimmed
        .parse()
        .map_err(|_| ApiError::UnprocessableEntity("Index must be an integer".to_string()))?;

    if value < 0 || value as u64 > MAX_REQUESTED_INDEX {
        return Err(ApiError::UnprocessableEntity(format!(
            "Index must be between 0 and {}",
            MAX_REQUESTED_INDEX
        )));
    }

    Ok(value as u64)
}

/// `GET /api/fibonacci/calculated/{index}`
pub async fn get_calculated(
    State(state): State<Arc<ApiState>>,
    Path(index): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let index = parse_index(&index)?;
    let value = state.cache.get_value(index).await?;

    Ok(Json(json!({ "calculated_value": value })))
}

/// `POST /api/fibonacci/calculate/{index}`
pub async fn request_calculation(
    State(state): State<Arc<ApiState>>,
    Path(index): Path<String>,
) -> Result<Response, ApiError> {
    let index = parse_index(&index)?;

    if state.cache.get_value(index).await?.is_some() {
        state.db.log_request(index).await?;
        return Ok((
            StatusCode::CONFLICT,
            Json(json!({ "error": "Already calculated", "index": index })),
        )
            .into_response());
    }

    state.db.log_request(index).await?;
    let enqueued = state.queue.enqueue_if_absent(index).await?;
    debug!(index, enqueued, "Computation requested");

    Ok(Json(json!({ "working": true })).into_response())
}

/// `GET /api/fibonacci/most-requested`
pub async fn most_requested(
    State(state): State<Arc<ApiState>>,
) -> Result<Response, ApiError> {
    match state.db.most_requested().await? {
        Some(row) => Ok(Json(json!({ "most_requested": row })).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "most_requested": null })),
        )
            .into_response()),
    }
}

/// `GET /api/ops/deadletter/len`
pub async fn dead_letter_len(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let length = state.queue.dead_letter_len().await?;

    Ok(Json(json!({ "length": length })))
}

/// Range parameters for dead-letter reads.
#[derive(Debug, Deserialize)]
pub struct RangeParams {
    start: Option<i64>,
    stop: Option<i64>,
}

/// Resolves a requested window into a validated, size-capped range.
fn resolve_range(start: Option<i64>, stop: Option<i64>) -> Result<(i64, i64), ApiError> {
    let start = start.unwrap_or(0);
    let max_stop = start.saturating_add(DEAD_LETTER_PAGE_SIZE - 1);
    let stop = stop.map_or(max_stop, |s| s.min(max_stop));

    if start < 0 || stop < start {
        return Err(ApiError::UnprocessableEntity("Invalid range".to_string()));
    }

    Ok((start, stop))
}

/// `GET /api/ops/deadletter?start=&stop=`
pub async fn dead_letter_range(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<RangeParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (start, stop) = resolve_range(params.start, params.stop)?;
    let items = state
        .queue
        .peek_dead_letter(start as isize, stop as isize)
        .await?;

    Ok(Json(json!({ "items": items, "start": start, "stop": stop })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unprocessable_message(err: ApiError) -> String {
        match err {
            ApiError::UnprocessableEntity(message) => message,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_index_accepts_full_range() {
        assert_eq!(parse_index("0").expect("should parse"), 0);
        assert_eq!(parse_index("40").expect("should parse"), 40);
        assert_eq!(parse_index(" 17 ").expect("should parse"), 17);
    }

    #[test]
    fn test_parse_index_rejects_empty() {
        let message = unprocessable_message(parse_index("  ").expect_err("must fail"));
        assert_eq!(message, "Index is required");
    }

    #[test]
    fn test_parse_index_rejects_non_integers() {
        let message = unprocessable_message(parse_index("abc").expect_err("must fail"));
        assert_eq!(message, "Index must be an integer");

        let message = unprocessable_message(parse_index("12.5").expect_err("must fail"));
        assert_eq!(message, "Index must be an integer");
    }

    #[test]
    fn test_parse_index_rejects_out_of_range() {
        let message = unprocessable_message(parse_index("-1").expect_err("must fail"));
        assert_eq!(message, "Index must be between 0 and 40");

        let message = unprocessable_message(parse_index("41").expect_err("must fail"));
        assert_eq!(message, "Index must be between 0 and 40");
    }

    #[test]
    fn test_resolve_range_defaults_to_first_page() {
        assert_eq!(resolve_range(None, None).expect("should resolve"), (0, 49));
    }

    #[test]
    fn test_resolve_range_caps_window_size() {
        assert_eq!(
            resolve_range(Some(10), Some(500)).expect("should resolve"),
            (10, 59)
        );
        assert_eq!(
            resolve_range(Some(10), Some(20)).expect("should resolve"),
            (10, 20)
        );
    }

    #[test]
    fn test_resolve_range_rejects_invalid_windows() {
        assert!(resolve_range(Some(-1), None).is_err());
        assert!(resolve_range(Some(10), Some(5)).is_err());
    }
}
