//! Error types for marcalink-store

use std::path::{Path, PathBuf};

use marcalink_domain::DomainError;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Fatal, per-operation failures.
///
/// Expected failures (invalid name, not found, offline) are reported as
/// [`StoreResponse`](crate::StoreResponse) values with an error status instead.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Rejected input (bad project name, malformed envelope)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Socket could not be used (not open, closed before the response)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Filesystem failure
    #[error("Persistence error at {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected response shape or timeout from the remote authority
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),
}

impl StoreError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        StoreError::Persistence {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the error means the remote authority was unreachable
    pub fn is_transport(&self) -> bool {
        matches!(self, StoreError::Transport(_))
    }
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        StoreError::Validation(err.to_string())
    }
}
