//! Error types for marcalink-domain

use thiserror::Error;

/// Result type alias for domain operations
pub type Result<T> = std::result::Result<T, DomainError>;

/// Errors raised while validating or parsing domain values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Project name is missing, empty after trimming, or uses forbidden characters
    #[error("{0}")]
    InvalidProjectName(String),

    /// Paper id cannot be used as a file name
    #[error("Invalid paper id: {0}")]
    InvalidPaperId(String),

    /// Key base outside the closed namespace set
    #[error("Unknown key base: {0}")]
    UnknownKeyBase(String),
}
