use std::time::Duration;

use thiserror::Error;

use crate::http::HttpError;

/// Errors raised by calls to either external system.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The remote signalled a rate limit (HTTP 429, or GitHub's exhausted
    /// primary quota).
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        /// Server-provided hint for how long to wait, if any.
        retry_after: Option<Duration>,
        message: String,
    },

    /// Non-success HTTP status other than a rate limit.
    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },

    /// Network or connection error.
    #[error("Network error: {message}")]
    Network { message: String },

    /// A response did not match the shape we expect.
    #[error("Invalid {entity} payload: {message}")]
    Validation {
        entity: &'static str,
        message: String,
    },

    /// Unexpected/internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    /// Create a status error.
    #[inline]
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Create a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a validation error for the given entity kind.
    #[inline]
    pub fn validation(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            entity,
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status associated with this error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-provided wait hint for rate-limit errors.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Check if this error is a rate limit error.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Check if the remote reported the resource as missing.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

impl From<HttpError> for ApiError {
    fn from(err: HttpError) -> Self {
        ApiError::network(err.to_string())
    }
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of an error message, which keeps multi-line API
/// error bodies out of logs and the recorded error history.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for external API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
