//! Common error types for Melodee

use thiserror::Error;

/// Common result type for Melodee operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the ingest pipeline and the catalog store
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error (sidecar files, stored payloads)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request conflicts with the current state (e.g. invalid status transition)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable error code for callers that surface errors over an API.
    ///
    /// Malformed input maps to `BAD_REQUEST`, missing ids to `NOT_FOUND` and
    /// invalid state transitions to `CONFLICT`. Everything else is internal.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidInput(_) => "BAD_REQUEST",
            Error::Conflict(_) => "CONFLICT",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) | Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// HTTP status equivalent of [`Error::code`]
    pub fn status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::InvalidInput(_) => 400,
            Error::Conflict(_) => 409,
            _ => 500,
        }
    }

    /// True for client-side errors that must not be retried
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NotFound("staging item 7".into()).code(), "NOT_FOUND");
        assert_eq!(Error::InvalidInput("notes required".into()).code(), "BAD_REQUEST");
        assert_eq!(Error::Conflict("already approved".into()).code(), "CONFLICT");
        assert_eq!(Error::Internal("boom".into()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(Error::Conflict("x".into()).is_client_error());
        assert!(Error::InvalidInput("x".into()).is_client_error());
        assert!(!Error::Internal("x".into()).is_client_error());
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.status(), 500);
    }
}
