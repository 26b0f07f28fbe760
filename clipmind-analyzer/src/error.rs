//! Error types for clipmind-analyzer
//!
//! [`PipelineError`] is the taxonomy shared by engines, stage handlers and the
//! orchestrator. [`ApiError`] maps it (and request validation failures) onto
//! HTTP responses of the form `{"error": {"code", "sub_code", "message"}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::providers::ProviderError;
use crate::transport::TransportError;

/// Pipeline error taxonomy
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad identity format or missing required field (never retried)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Video, transcript or vector absent (terminal for the request)
    #[error("Not found: {0}")]
    NotFound(String),

    /// External model provider failed (retryable)
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Event log unreachable (triggers the in-process fallback)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Storage read/write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Required collaborator or setting missing
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether a supervisor may re-trigger the failed stage
    pub fn retryable(&self) -> bool {
        match self {
            PipelineError::InvalidInput(_) | PipelineError::NotFound(_) => false,
            PipelineError::Config(_) => false,
            PipelineError::Provider(_)
            | PipelineError::Transport(_)
            | PipelineError::Persistence(_) => true,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "VALIDATION_ERROR",
            PipelineError::NotFound(_) => "NOT_FOUND",
            PipelineError::Provider(_) => "PROVIDER_ERROR",
            PipelineError::Transport(_) => "TRANSPORT_ERROR",
            PipelineError::Persistence(_) => "DATABASE_ERROR",
            PipelineError::Config(_) => "PROVIDER_CONFIGURATION_ERROR",
        }
    }

    pub fn sub_code(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "INVALID_INPUT",
            PipelineError::NotFound(_) => "RECORD_NOT_FOUND",
            PipelineError::Provider(e) => e.sub_code(),
            PipelineError::Transport(e) => e.sub_code(),
            PipelineError::Persistence(_) => "DATABASE_QUERY_FAILED",
            PipelineError::Config(_) => "PROVIDER_CONFIG_MISSING",
        }
    }
}

impl From<clipmind_common::Error> for PipelineError {
    fn from(err: clipmind_common::Error) -> Self {
        use clipmind_common::Error as E;
        match err {
            E::NotFound(msg) => PipelineError::NotFound(msg),
            E::InvalidInput(msg) => PipelineError::InvalidInput(msg),
            E::Config(msg) => PipelineError::Config(msg),
            E::Database(sqlx::Error::RowNotFound) => {
                PipelineError::NotFound("record not found".to_string())
            }
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::from(clipmind_common::Error::from(err))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. duplicate external id
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<clipmind_common::Error> for ApiError {
    fn from(err: clipmind_common::Error) -> Self {
        ApiError::Pipeline(err.into())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Pipeline(err.into())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str, String) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", "RECORD_NOT_FOUND", msg.clone()),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", "INVALID_INPUT", msg.clone())
            }
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", "DUPLICATE", msg.clone()),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "UNKNOWN",
                "Internal server error".to_string(),
            ),
            ApiError::Pipeline(err) => {
                let status = match err {
                    PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
                    PipelineError::Provider(_) => StatusCode::BAD_GATEWAY,
                    PipelineError::Transport(_) | PipelineError::Config(_) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    PipelineError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                // Raw storage errors stay in the log, not the response
                let message = match err {
                    PipelineError::Persistence(_) => "Internal server error".to_string(),
                    other => other.to_string(),
                };
                (status, err.code(), err.sub_code(), message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, sub_code, message) = self.parts();

        if status.is_server_error() {
            error!(code, sub_code, error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "sub_code": sub_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
