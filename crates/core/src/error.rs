//! Error types for rcopy-core
//!
//! A single error enum covers storage, session and configuration failures.
//! Per-unit errors travel as values on status events; session errors are fatal.

use thiserror::Error;

/// Result type alias using rcopy-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the copy engine and its storage backends
#[derive(Debug, Error)]
pub enum Error {
    /// Local I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a session file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Remote request failed
    #[error("Network error: {0}")]
    Network(String),

    /// Source object or session does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Identifier could not be interpreted
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A non-recursive source names a directory
    #[error("'{0}' is a folder, append '...' to copy it recursively")]
    IsDirectory(String),

    /// Configuration file could not be loaded or saved
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session state is unreadable or inconsistent
    #[error("Session error: {0}")]
    Session(String),

    #[error("{0}")]
    General(String),
}

impl Error {
    /// Errors that make the session files unusable; the run cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Session(_) | Error::Json(_) | Error::Config(_))
    }
}
