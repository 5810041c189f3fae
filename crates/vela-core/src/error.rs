//! Error types for Vela Core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player error types
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unsupported environment: {0}")]
    InvalidEnvironment(String),

    // Control errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Playback denied: {0}")]
    PlaybackDenied(String),

    #[error("Invalid playback state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Session destroyed")]
    Destroyed,

    // Streaming errors
    #[error("Network error ({code}): {message}")]
    Network {
        code: String,
        message: String,
        fatal: bool,
    },

    #[error("Media error ({code}): {message}")]
    Media {
        code: String,
        message: String,
        fatal: bool,
    },

    #[error("Manifest error ({code}): {message}")]
    Manifest { code: String, message: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Returns true if this error may be retried in place
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Network { fatal: false, .. } | Error::Media { fatal: false, .. }
        )
    }

    /// Returns true if this error ends the session
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Network { fatal, .. } | Error::Media { fatal, .. } => *fatal,
            Error::Manifest { .. } => true,
            _ => false,
        }
    }

    /// Classification carried on error events
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network { .. } => ErrorKind::Network,
            Error::Media { .. } => ErrorKind::Media,
            Error::Manifest { .. } => ErrorKind::Manifest,
            _ => ErrorKind::Other,
        }
    }

    /// Returns the error code for events and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "INVALID_CONFIG",
            Error::InvalidEnvironment(_) => "INVALID_ENVIRONMENT",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::PlaybackDenied(_) => "PLAYBACK_DENIED",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::Destroyed => "DESTROYED",
            Error::Network { .. } => "NETWORK",
            Error::Media { .. } => "MEDIA",
            Error::Manifest { .. } => "MANIFEST",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

/// Streaming-layer error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Media,
    Manifest,
    Other,
}

impl ErrorKind {
    /// Whether an in-place recovery may be attempted for this kind
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Media)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Media => write!(f, "media"),
            ErrorKind::Manifest => write!(f, "manifest"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_only_for_non_fatal_streaming_errors() {
        let network = Error::Network {
            code: "fragLoadError".into(),
            message: "timeout".into(),
            fatal: false,
        };
        assert!(network.is_recoverable());
        assert!(!network.is_fatal());

        let manifest = Error::Manifest {
            code: "manifestLoadError".into(),
            message: "404".into(),
        };
        assert!(!manifest.is_recoverable());
        assert!(manifest.is_fatal());
        assert_eq!(manifest.kind(), ErrorKind::Manifest);

        assert!(!Error::config("no sources").is_recoverable());
        assert_eq!(Error::Destroyed.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::config("x").error_code(), "INVALID_CONFIG");
        assert_eq!(Error::invalid_argument("x").error_code(), "INVALID_ARGUMENT");
        assert_eq!(
            Error::PlaybackDenied("autoplay".into()).error_code(),
            "PLAYBACK_DENIED"
        );
    }
}
