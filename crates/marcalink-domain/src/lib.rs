//! Domain types for marcalink snowballing
//!
//! This crate provides the records a researcher accumulates while marking links
//! during manual literature snowballing:
//! - ProjectRecord: one logical research project and its current iteration
//! - PaperRecord: a marked paper with an append-only, bounded audit history
//! - KeyBase / namespaced keys: per-project keys inside a flat key/value space
//! - Fingerprints: stable paper ids derived from the paper URL
//! - Category inference: origin/status derived from a highlight category name

pub mod category;
pub mod error;
pub mod fingerprint;
pub mod keys;
pub mod paper;
pub mod project;
pub mod validation;

pub use category::*;
pub use error::{DomainError, Result};
pub use fingerprint::*;
pub use keys::*;
pub use paper::*;
pub use project::*;
pub use validation::*;

/// Current time as the timestamp type used throughout the records.
pub fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
