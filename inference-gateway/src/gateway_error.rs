//! # Gateway Error Mapping
//!
//! [`GatewayError`] wraps [`EngineError`] and adds the handful of failure
//! modes that only exist at the HTTP boundary (missing/invalid
//! authentication, a malformed request body, an unknown route parameter).
//! `IntoResponse` is the single place that decides what status code and JSON
//! body a caller sees; nothing else in this crate matches on `ErrorKind`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use inference_core::{EngineError, ErrorKind};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::Engine(e) => status_for_kind(e.kind()),
            GatewayError::Auth(_) => (StatusCode::UNAUTHORIZED, "AUTH"),
            GatewayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            GatewayError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG"),
        }
    }
}

/// Maps an [`ErrorKind`] onto the status code a caller should see. Kept
/// separate from the `retryable()` flag on `ErrorKind` itself: retryability
/// is an engine-internal concept, HTTP status is purely a boundary concern.
fn status_for_kind(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, kind.as_str()),
        ErrorKind::Auth => (StatusCode::UNAUTHORIZED, kind.as_str()),
        ErrorKind::QuotaExceeded => (StatusCode::TOO_MANY_REQUESTS, kind.as_str()),
        ErrorKind::RateLimit => (StatusCode::TOO_MANY_REQUESTS, kind.as_str()),
        ErrorKind::ProviderUnavailable => (StatusCode::BAD_GATEWAY, kind.as_str()),
        ErrorKind::CircuitOpen => (StatusCode::SERVICE_UNAVAILABLE, kind.as_str()),
        ErrorKind::Timeout => (StatusCode::GATEWAY_TIMEOUT, kind.as_str()),
        ErrorKind::Cancelled => (StatusCode::BAD_REQUEST, kind.as_str()),
        ErrorKind::AllProvidersUnavailable => (StatusCode::SERVICE_UNAVAILABLE, kind.as_str()),
        ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, kind.as_str()),
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let retry_after_ms = match &self {
            GatewayError::Engine(e) => e.suggested_delay().map(|d| d.as_millis() as u64),
            _ => None,
        };
        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": code,
                "retryable": matches!(&self, GatewayError::Engine(e) if e.retryable()),
                "retry_after_ms": retry_after_ms,
            }
        });
        (status, Json(body)).into_response()
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
