//! Error types for the plan review server.
//!
//! This module defines a unified error enumeration used across the Content
//! Store, Review State Engine, Event Bus, and the HTTP/MCP surfaces that
//! front them. It integrates with `thiserror` for `Display` and error source
//! chaining, and with `axum::response::IntoResponse` so handlers can return
//! `AppError` directly.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the plan review server.
pub enum AppError {
    /// No review, version, or comment exists with the given id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request payload failed validation (empty content, unknown actor kind, etc).
    #[error("validation failed: {0}")]
    ValidationError(String),

    /// Requested review status transition is not legal from the current status.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Content Store I/O failure (read, write, or path resolution).
    #[error("store error: {0}")]
    StoreError(String),

    /// A blocking agent call exceeded its wait bound without the review leaving `discussing`.
    #[error("timed out waiting for review to resolve")]
    Timeout,

    /// Underlying transport (SSE write, stdio framing, HTTP client) failed.
    #[error("transport error: {0}")]
    TransportError(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::StoreError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition(_) => StatusCode::BAD_REQUEST,
            AppError::StoreError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::TransportError(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::warn!(%status, error = %self, "request failed");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_taxonomy() {
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InvalidTransition("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_display_messages_are_readable() {
        let err = AppError::ValidationError("content must not be empty".into());
        assert_eq!(err.to_string(), "validation failed: content must not be empty");
    }
}
