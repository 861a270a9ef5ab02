//! Engine error types.

use ratekeeper_common::SourceError;
use thiserror::Error;

/// Configuration problems detected at load or validation time.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },

    /// Values parsed but are inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors returned by the engine.
///
/// Upstream failures never surface here; they are absorbed into fallback
/// quotes. Only caller misuse and construction problems do.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No source is registered under this name.
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// A source with this name is already registered.
    #[error("Source already registered: {0}")]
    DuplicateSource(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Building a source failed (for example the HTTP client).
    #[error("Failed to build source: {0}")]
    Source(#[from] SourceError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
