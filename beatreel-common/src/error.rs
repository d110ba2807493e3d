//! Common error types for beatreel

use thiserror::Error;

/// Common result type for beatreel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across beatreel crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error for a persisted record
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error came from writing or parsing a persisted record
    /// rather than from caller input.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Json(_))
    }
}
