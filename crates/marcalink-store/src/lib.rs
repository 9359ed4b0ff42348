//! Persistence and synchronization for marcalink
//!
//! Callers go through [`PersistenceFacade`], which serves reads and writes
//! from one of two backends:
//! - [`FilesystemBackend`]: a local directory tree, always reachable
//! - [`SocketBackend`]: a remote authority behind a WebSocket owned by
//!   [`ConnectionManager`], which reconnects with exponential backoff
//!
//! Writes made while the remote authority is unreachable are buffered by
//! [`OfflineBackupQueue`] in the [`LocalStore`] and replayed on reconnect.

pub mod backend;
pub mod backup;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod facade;
pub mod local;
pub mod protocol;
pub mod response;
pub mod snapshot;

pub use backend::{BackendKind, FilesystemBackend, RemoteStoreBackend, SocketBackend};
pub use backup::{BackupEnvelope, OfflineBackupQueue, ResyncOutcome};
pub use client::ActClient;
pub use config::{
    BackendMode, BackupConfig, BackupKeyPolicy, ConnectionConfig, CorrelationMode,
    MarcalinkConfig, ServerConfig, StorageConfig,
};
pub use connection::{build_ws_url, ConnectionManager, ConnectionState, LogEntry};
pub use error::{Result, StoreError};
pub use facade::PersistenceFacade;
pub use local::{JsonFileStore, LocalStore, MemoryStore};
pub use protocol::{act, Envelope, EnvelopeError, Items};
pub use response::{Status, StoreResponse};
pub use snapshot::ProjectSnapshot;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking holder poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
