//! Error types for upstream rate acquisition.

use std::time::Duration;

use thiserror::Error;

/// Why a fetch from an upstream source failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// Upstream unreachable or answered with a non-2xx status.
    #[error("Transport error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Upstream asked us to slow down.
    #[error("Rate limited by upstream")]
    RateLimited,

    /// Response arrived but no usable value could be extracted.
    #[error("No data extracted: {0}")]
    NoData(String),

    /// Neither the target nor the fallback asset had any advertisements.
    #[error("No liquidity data for {target} or {fallback}")]
    NoLiquidity { target: String, fallback: String },

    /// Response body did not match the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The attempt exceeded its allotted duration.
    #[error("Operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The circuit breaker refused the attempt.
    #[error("Circuit breaker is open for {0}")]
    CircuitOpen(String),
}

impl SourceError {
    /// Create a transport error from a status code.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        if status == 429 {
            return SourceError::RateLimited;
        }
        SourceError::Transport {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a transport error without a status (connection failures).
    pub fn transport(message: impl Into<String>) -> Self {
        SourceError::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Check if this error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Transport { status: None, .. } => true,
            SourceError::Transport {
                status: Some(status),
                ..
            } => matches!(status, 500 | 502 | 503 | 504),
            SourceError::RateLimited | SourceError::Timeout(_) => true,
            // Parse failures are final for the call.
            SourceError::NoData(_)
            | SourceError::NoLiquidity { .. }
            | SourceError::InvalidResponse(_)
            | SourceError::CircuitOpen(_) => false,
        }
    }

    /// Get error code for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            SourceError::Transport { .. } => "TRANSPORT_ERROR",
            SourceError::RateLimited => "RATE_LIMITED",
            SourceError::NoData(_) => "NO_DATA",
            SourceError::NoLiquidity { .. } => "NO_LIQUIDITY",
            SourceError::InvalidResponse(_) => "INVALID_RESPONSE",
            SourceError::Timeout(_) => "TIMEOUT",
            SourceError::CircuitOpen(_) => "CIRCUIT_OPEN",
        }
    }

    /// Reason attached to a fallback response served because of this error.
    pub fn fallback_reason(&self) -> &'static str {
        match self {
            SourceError::Transport { .. }
            | SourceError::RateLimited
            | SourceError::InvalidResponse(_) => "fetch failed",
            SourceError::NoData(_) | SourceError::NoLiquidity { .. } => "no data extracted",
            SourceError::Timeout(_) => "timeout",
            SourceError::CircuitOpen(_) => "circuit open",
        }
    }
}

/// Result type for source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;
