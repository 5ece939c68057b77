//! # Error Taxonomy
//!
//! Every failure the engine can surface is tagged with one of a fixed set of
//! [`ErrorKind`]s. Each kind has a fixed retryability and, for `CircuitOpen`,
//! a suggested retry delay — callers never need to pattern-match on message
//! text to decide whether to retry.
//!
//! ## Error Categories
//!
//! - **Client errors** (`Validation`, `Auth`, `QuotaExceeded`): the request or
//!   tenant is at fault; never retryable.
//! - **Transient errors** (`RateLimit`, `ProviderUnavailable`, `CircuitOpen`,
//!   `Timeout`): the same request may succeed later; always retryable.
//! - **Terminal errors** (`Cancelled`, `AllProvidersUnavailable`): retrying
//!   would not help within this call.
//! - **`Internal`**: unexpected failure; conservatively retryable.

use std::time::Duration;
use thiserror::Error;

/// Closed set of error categories the orchestrator can surface.
///
/// Each kind has exactly one fixed retryable flag, independent of the
/// message attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Auth,
    QuotaExceeded,
    RateLimit,
    ProviderUnavailable,
    CircuitOpen,
    Timeout,
    Cancelled,
    AllProvidersUnavailable,
    Internal,
}

impl ErrorKind {
    /// Fixed retryability, per the error handling design's table.
    pub const fn retryable(self) -> bool {
        match self {
            ErrorKind::Validation => false,
            ErrorKind::Auth => false,
            ErrorKind::QuotaExceeded => false,
            ErrorKind::RateLimit => true,
            ErrorKind::ProviderUnavailable => true,
            ErrorKind::CircuitOpen => true,
            ErrorKind::Timeout => true,
            ErrorKind::Cancelled => false,
            ErrorKind::AllProvidersUnavailable => false,
            ErrorKind::Internal => true,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Auth => "AUTH",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::AllProvidersUnavailable => "ALL_PROVIDERS_UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine's uniform error type. Every variant maps to exactly one
/// [`ErrorKind`]; `kind()` never needs to inspect the message.
///
/// Every field is owned and `Clone`, so an `EngineError` can be stashed on an
/// [`crate::plugin::ExecutionContext`] and also surfaced to the caller.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("rate limited: {message}")]
    RateLimit { message: String },

    #[error("provider {provider_id} unavailable: {message}")]
    ProviderUnavailable { provider_id: String, message: String },

    #[error("circuit open for provider {provider_id}, retry after {retry_after_ms}ms")]
    CircuitOpen {
        provider_id: String,
        retry_after_ms: u64,
    },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("no provider available for model {model}")]
    AllProvidersUnavailable { model: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation { .. } => ErrorKind::Validation,
            EngineError::Auth { .. } => ErrorKind::Auth,
            EngineError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            EngineError::RateLimit { .. } => ErrorKind::RateLimit,
            EngineError::ProviderUnavailable { .. } => ErrorKind::ProviderUnavailable,
            EngineError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Cancelled { .. } => ErrorKind::Cancelled,
            EngineError::AllProvidersUnavailable { .. } => ErrorKind::AllProvidersUnavailable,
            EngineError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// See [`ErrorKind::retryable`].
    pub fn retryable(&self) -> bool {
        self.kind().retryable()
    }

    /// Suggested backoff before a retry; only meaningful for `CircuitOpen`.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            EngineError::CircuitOpen { retry_after_ms, .. } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
