//! Authoritative store variants behind one contract

mod filesystem;
mod socket;

pub use filesystem::FilesystemBackend;
pub use socket::SocketBackend;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::Items;
use crate::response::StoreResponse;

/// Which variant a backend is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Filesystem,
    Socket,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Filesystem => write!(f, "filesystem"),
            BackendKind::Socket => write!(f, "socket"),
        }
    }
}

/// CRUD for projects and papers plus flat key/value access.
///
/// Expected failures (invalid name, not found, offline) come back as
/// `Ok` with an error status; `Err` is reserved for failures that should
/// abort the operation, such as a write the filesystem refused.
#[async_trait]
pub trait RemoteStoreBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether calls currently reach the authoritative store
    fn is_active(&self) -> bool;

    async fn save_project(&self, name: &str, data: Value) -> Result<StoreResponse>;

    async fn load_project(&self, name: &str) -> Result<StoreResponse>;

    /// Create an empty project; an error when it already exists
    async fn create_project(&self, name: &str) -> Result<StoreResponse>;

    /// Remove the project and everything stored under it
    async fn delete_project(&self, name: &str) -> Result<StoreResponse>;

    /// Hide the project from listings, keeping its data
    async fn archive_project(&self, name: &str) -> Result<StoreResponse>;

    /// Names of all non-archived projects
    async fn list_projects(&self) -> Result<StoreResponse>;

    async fn save_paper(&self, project: &str, paper_id: &str, data: Value)
        -> Result<StoreResponse>;

    async fn load_paper(&self, project: &str, paper_id: &str) -> Result<StoreResponse>;

    async fn delete_paper(&self, project: &str, paper_id: &str) -> Result<StoreResponse>;

    async fn list_papers(&self, project: &str) -> Result<StoreResponse>;

    /// Values for `keys`; every stored key when `keys` is empty
    async fn get(&self, keys: &[String]) -> Result<StoreResponse>;

    /// Shallow-merge `items`, last write wins per key
    async fn set(&self, items: Items) -> Result<StoreResponse>;

    async fn remove(&self, keys: &[String]) -> Result<StoreResponse>;
}
