//! Error types for Wayback.
//!
//! Library crates use [`WaybackError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::Slot;

/// Top-level error type for all Wayback operations.
#[derive(Debug, thiserror::Error)]
pub enum WaybackError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to a backend, homeserver or publisher.
    #[error("network error: {0}")]
    Network(String),

    /// A single archival backend failed for every submitted URL.
    #[error("{slot} backend failed: {message}")]
    Backend { slot: Slot, message: String },

    /// The inbound text contained no URL.
    #[error("URL no found")]
    NoUrl,

    /// No enabled slot produced a single archived URL.
    #[error("archives failure: no slot returned any result")]
    NoResults,

    /// The caller-supplied dispatch deadline elapsed.
    #[error("deadline exceeded after {secs}s")]
    Deadline { secs: u64 },

    /// Building channel output (HTML, JSON, chat body) failed.
    #[error("render error: {0}")]
    Render(String),

    /// Delivering, publishing or acknowledging over a channel failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A front-end could not start (missing credentials, bind failure).
    #[error("startup error: {message}")]
    Startup { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed input, unexpected response shape).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, WaybackError>;

impl WaybackError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a backend error attributed to `slot`.
    pub fn backend(slot: Slot, msg: impl Into<String>) -> Self {
        Self::Backend {
            slot,
            message: msg.into(),
        }
    }

    /// Create a startup error from any displayable message.
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup {
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

    /// Whether this error is a user-visible, per-request outcome rather than
    /// a fault in the service itself.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoUrl | Self::NoResults | Self::Backend { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = WaybackError::config("missing homeserver");
        assert_eq!(err.to_string(), "config error: missing homeserver");

        let err = WaybackError::backend(Slot::Ia, "HTTP 523");
        assert_eq!(err.to_string(), "ia backend failed: HTTP 523");

        let err = WaybackError::Deadline { secs: 300 };
        assert!(err.to_string().contains("300s"));
    }

    #[test]
    fn recoverable_classification() {
        assert!(WaybackError::NoUrl.is_recoverable());
        assert!(WaybackError::NoResults.is_recoverable());
        assert!(!WaybackError::startup("no listener").is_recoverable());
        assert!(!WaybackError::Transport("redact".into()).is_recoverable());
    }
}
