//! Error types for refscout.
//!
//! Library crates use [`RefScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-candidate failures (a 404, a scorer outage) are not errors at the
//! engine boundary: they are classified with [`crate::ErrorKind`] and folded
//! into the candidate's terminal state. Only conditions that make the engine
//! itself unable to continue are surfaced as `RefScoutError`.

use std::path::PathBuf;

/// Top-level error type for all refscout operations.
#[derive(Debug, thiserror::Error)]
pub enum RefScoutError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching an origin document.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or URL normalization error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Relevance scorer transport or protocol error.
    #[error("scorer unavailable: {0}")]
    Scorer(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input URL, unknown guard name, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Persisted state violates a lifecycle invariant.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RefScoutError>;

impl RefScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
