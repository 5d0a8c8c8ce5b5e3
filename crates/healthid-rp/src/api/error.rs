//! API error types and responses

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::LoginError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    /// Any failed login; the reason is logged, never returned
    #[error("Login failed: {0}")]
    LoginFailed(#[from] LoginError),

    /// Login request or callback the extractors could not read
    #[error("Invalid login request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::LoginFailed(err) => {
                warn!(kind = %err.kind(), retryable = err.is_retryable(), error = %err, "Login failed");
                (StatusCode::UNAUTHORIZED, "LOGIN_FAILED", "login failed")
            }
            ApiError::InvalidRequest(reason) => {
                warn!(error = %reason, "Login failed on unreadable request");
                (StatusCode::UNAUTHORIZED, "LOGIN_FAILED", "login failed")
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "internal error")
            }
        };

        let body = ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<healthid_core::HealthIdError> for ApiError {
    fn from(err: healthid_core::HealthIdError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}
