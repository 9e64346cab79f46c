//! Error types for the client.

use std::time::Duration;

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum VariError {
    /// Admission refused, either locally (queue full, queueing disabled,
    /// limiter reset) or by the server (429).
    #[error("rate limited: {reason}")]
    RateLimited {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Structural violation of the bundle container format.
    #[error("invalid bundle: {message}")]
    InvalidBundle { message: String },

    /// Underlying cache storage failure.
    #[error("cache error during {operation}: {message}")]
    Cache {
        operation: &'static str,
        message: String,
    },

    /// Resource not found on the server.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// Network error.
    #[error("network error: {message}")]
    Network { message: String },

    /// Invalid response from the server.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl VariError {
    pub(crate) fn rate_limited(reason: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            reason: reason.into(),
            retry_after,
        }
    }

    pub(crate) fn invalid_bundle(message: impl Into<String>) -> Self {
        Self::InvalidBundle {
            message: message.into(),
        }
    }

    pub(crate) fn cache(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Cache {
            operation,
            message: err.to_string(),
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Not found / config issues
            Self::NotFound { .. } => 1,
            Self::Config { .. } => 1,

            // Rejected source data
            Self::InvalidBundle { .. } => 4,

            // Network/transient
            Self::RateLimited { .. } => 5,
            Self::Network { .. } => 5,

            // Other
            Self::Cache { .. } => 6,
            Self::InvalidResponse { .. } => 6,
        }
    }

    /// Whether the caller may retry. Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network { .. })
    }
}

impl From<reqwest::Error> for VariError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for client operations.
pub type VariResult<T> = Result<T, VariError>;
