use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures of the vector index. These are always surfaced to the caller.
#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Vector index unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Invalid filter: {reason}")]
    InvalidFilter { reason: String },

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Collection {name} uses an unsupported distance metric: {metric}")]
    MetricMismatch { name: String, metric: String },

    #[error("Failed to upsert vectors: {reason}")]
    UpsertFailed { reason: String },

    #[error("Failed to search vectors: {reason}")]
    SearchFailed { reason: String },

    #[error("Failed to delete vectors: {reason}")]
    DeleteFailed { reason: String },
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("LLM request failed: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("LLM returned no content")]
    EmptyResponse,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Ingestion already in progress")]
    AlreadyRunning,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::AlreadyRunning => ApiError::Conflict(err.to_string()),
            IngestError::Failed(e) => ApiError::internal("Data ingestion failed", format!("{:#}", e)),
        }
    }
}

/// Errors returned by HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        ApiError::Internal(format!("{}: {}", context, err))
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct JsonError {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        let mut response = Json(JsonError {
            message: self.to_string(),
        })
        .into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("x".into()).into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::internal("Search failed", "boom").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_ingest_errors_map_to_conflict_and_internal() {
        assert_eq!(
            ApiError::from(IngestError::AlreadyRunning)
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        let failed = ApiError::from(IngestError::Failed(anyhow::anyhow!("db down")));
        assert_eq!(failed.to_string(), "Data ingestion failed: db down");
    }

    #[test]
    fn test_internal_message_keeps_context() {
        let err = ApiError::internal("Error searching medicines", "index down");
        assert_eq!(err.to_string(), "Error searching medicines: index down");
    }
}
