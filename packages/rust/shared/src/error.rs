//! Error types for the ChatDoc client.
//!
//! Library crates use [`ChatDocError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ChatDoc client operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatDocError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP transport error (unreachable host, body read failure,
    /// malformed response body).
    #[error("network error: {0}")]
    Network(String),

    /// The backend rejected the bearer credential (expired or invalid).
    /// During session reconciliation this is an expected outcome, not an
    /// operational error.
    #[error("authorization rejected: credential expired or invalid")]
    AuthRejected,

    /// The backend answered with an explicit failure message.
    #[error("{message}")]
    Api { message: String },

    /// Local key-value store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Client-side precondition violation (wrong file type, oversize file).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ChatDocError>;

impl ChatDocError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an API failure from any displayable message.
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api {
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

    /// Whether this error is the expected credential-expiry signal.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::AuthRejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ChatDocError::config("missing backend URL");
        assert_eq!(err.to_string(), "config error: missing backend URL");

        let err = ChatDocError::validation("file exceeds 10MB");
        assert!(err.to_string().contains("10MB"));
    }

    #[test]
    fn auth_rejection_is_distinguishable() {
        assert!(ChatDocError::AuthRejected.is_auth_rejection());
        assert!(!ChatDocError::Network("timeout".into()).is_auth_rejection());
        assert!(!ChatDocError::api("upload failed").is_auth_rejection());
    }
}
