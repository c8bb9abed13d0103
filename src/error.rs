//! Error types for shell-relay.

use thiserror::Error;

/// Main error type for shell-relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Terminal dimensions are non-integer or outside the configured bounds.
    #[error("invalid terminal dimensions {cols}x{rows} (allowed 1..={max_cols} x 1..={max_rows})")]
    InvalidDimensions {
        cols: f64,
        rows: f64,
        max_cols: u16,
        max_rows: u16,
    },

    /// Input payload is oversized or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No live session for the given composite key.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The shell process could not be created.
    #[error("failed to spawn shell: {0}")]
    SpawnFailure(String),

    /// Connection did not present an identity token.
    #[error("authentication required")]
    AuthRequired,

    /// Identity token was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// PTY-related error.
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

impl RelayError {
    /// Stable machine-readable code, sent to clients in error replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDimensions { .. } => "INVALID_DIMENSIONS",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SpawnFailure(_) => "SPAWN_FAILURE",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AuthFailed(_) => "AUTH_FAILED",
            Self::Pty(_) | Self::Io(_) | Self::LockPoisoned | Self::ChannelClosed => {
                "INTERNAL_ERROR"
            }
        }
    }
}

/// Convenience Result type for shell-relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_display() {
        let err = RelayError::SessionNotFound("u1/t1".into());
        assert!(err.to_string().contains("u1/t1"));
        assert!(err.to_string().contains("not found"));
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[test]
    fn test_invalid_dimensions_display() {
        let err = RelayError::InvalidDimensions {
            cols: 500.0,
            rows: 24.0,
            max_cols: 300,
            max_rows: 100,
        };
        let text = err.to_string();
        assert!(text.contains("500x24"));
        assert!(text.contains("1..=300"));
        assert_eq!(err.code(), "INVALID_DIMENSIONS");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_spawn_failure_display() {
        let err = RelayError::SpawnFailure("no such file".into());
        assert!(err.to_string().contains("spawn"));
        assert_eq!(err.code(), "SPAWN_FAILURE");
    }

    #[test]
    fn test_auth_codes() {
        assert_eq!(RelayError::AuthRequired.code(), "AUTH_REQUIRED");
        assert_eq!(RelayError::AuthFailed("bad".into()).code(), "AUTH_FAILED");
    }
}
