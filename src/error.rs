//! Error types for the lifecycle manager and API responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failures reported by the model lifecycle manager
///
/// "Already downloaded" and "already loaded" are not errors; they are
/// reported through [`crate::models::PullOutcome`] and
/// [`crate::models::LoadOutcome`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Model [{0}] is not declared in the manifest")]
    ModelNotRecognized(String),

    #[error("Model [{0}] was not pulled before")]
    ModelNotDownloaded(String),

    #[error("Model [{0}] is not loaded")]
    ModelNotLoaded(String),

    /// Generic operation failure with a human-readable reason
    #[error("{0}")]
    Fail(String),
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// Operation failure whose reason is returned to the client verbatim
    Failed(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Failed(msg) => {
                tracing::warn!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::ModelNotRecognized(_) | LifecycleError::ModelNotDownloaded(_) => {
                ApiError::BadRequest(err.to_string())
            }
            LifecycleError::ModelNotLoaded(_) => ApiError::NotFound(err.to_string()),
            LifecycleError::Fail(reason) => ApiError::Failed(reason),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}
