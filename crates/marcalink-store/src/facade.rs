//! Single entry point for reads and writes
//!
//! The facade decides once, on first use, which backend variant serves this
//! process and then delegates every call to it. Reads fall back to the local
//! store while the backend is unreachable; writes always go to the backend,
//! whose socket variant diverts them to the offline backup on its own.

use std::sync::{Arc, Mutex};

use marcalink_domain::{project_keys, validate_project_name};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::backend::{BackendKind, FilesystemBackend, RemoteStoreBackend, SocketBackend};
use crate::backup::OfflineBackupQueue;
use crate::client::ActClient;
use crate::config::{BackendMode, MarcalinkConfig};
use crate::connection::ConnectionManager;
use crate::error::{Result, StoreError};
use crate::local::{JsonFileStore, LocalStore, MemoryStore};
use crate::lock;
use crate::protocol::Items;
use crate::response::StoreResponse;

/// Process-wide persistence context
pub struct PersistenceFacade {
    config: MarcalinkConfig,
    local: Arc<dyn LocalStore>,
    backend: OnceCell<Arc<dyn RemoteStoreBackend>>,
    connection: Mutex<Option<ConnectionManager>>,
}

impl PersistenceFacade {
    /// Facade whose backend is resolved from `config` on first use
    pub fn new(config: MarcalinkConfig, local: Arc<dyn LocalStore>) -> Self {
        Self {
            config,
            local,
            backend: OnceCell::new(),
            connection: Mutex::new(None),
        }
    }

    /// Facade over an already constructed backend
    pub fn with_backend(
        config: MarcalinkConfig,
        local: Arc<dyn LocalStore>,
        backend: Arc<dyn RemoteStoreBackend>,
    ) -> Self {
        Self {
            config,
            local,
            backend: OnceCell::new_with(Some(backend)),
            connection: Mutex::new(None),
        }
    }

    /// Facade with the local store named by `storage.fallback_path`, or an
    /// in-memory one when unset
    pub fn from_config(config: MarcalinkConfig) -> Result<Self> {
        let local: Arc<dyn LocalStore> = match &config.storage.fallback_path {
            Some(path) => Arc::new(JsonFileStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(config, local))
    }

    pub fn config(&self) -> &MarcalinkConfig {
        &self.config
    }

    pub fn local_store(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    /// Whether the backend decision has been made
    pub fn is_initialized(&self) -> bool {
        self.backend.initialized()
    }

    /// The connection owned by a socket backend
    pub fn connection(&self) -> Option<ConnectionManager> {
        lock(&self.connection).clone()
    }

    /// The backend serving this facade, resolving it on first call
    pub async fn backend(&self) -> Result<Arc<dyn RemoteStoreBackend>> {
        self.backend
            .get_or_try_init(|| async { self.resolve() })
            .await
            .cloned()
    }

    pub async fn kind(&self) -> Result<BackendKind> {
        Ok(self.backend().await?.kind())
    }

    fn resolve(&self) -> Result<Arc<dyn RemoteStoreBackend>> {
        let storage = &self.config.storage;
        match storage.mode {
            BackendMode::Filesystem => {
                let dir = storage.resolved_data_dir().ok_or_else(|| {
                    StoreError::Config("no data directory for the filesystem backend".into())
                })?;
                Ok(Arc::new(FilesystemBackend::open(dir)?))
            }
            BackendMode::Socket => Ok(self.socket_backend()),
            BackendMode::Auto => {
                if let Some(dir) = storage.resolved_data_dir() {
                    match FilesystemBackend::open(&dir) {
                        Ok(backend) => return Ok(Arc::new(backend)),
                        Err(e) => warn!("filesystem unavailable ({}), using socket backend", e),
                    }
                }
                Ok(self.socket_backend())
            }
        }
    }

    fn socket_backend(&self) -> Arc<dyn RemoteStoreBackend> {
        let connection = ConnectionManager::with_status_store(
            self.config.connection.clone(),
            Arc::clone(&self.local),
        );
        let client = ActClient::new(connection.clone());
        let backup = Arc::new(OfflineBackupQueue::new(
            Arc::clone(&self.local),
            client.clone(),
            self.config.backup.clone(),
        ));
        backup.attach(&connection);
        connection.auto_connect();
        info!("using socket backend at {}", connection.address().unwrap_or_default());

        *lock(&self.connection) = Some(connection);
        Arc::new(SocketBackend::new(client, backup))
    }

    /// Values for `keys` (everything when empty), from the backend when it
    /// is reachable and from the local store otherwise
    pub async fn get(&self, keys: &[String]) -> Result<StoreResponse> {
        let backend = self.backend().await?;
        if backend.is_active() {
            return backend.get(keys).await;
        }
        let items = if keys.is_empty() {
            self.local.get_all()?
        } else {
            self.local.get(keys)?
        };
        Ok(StoreResponse::ok_with_data(Value::Object(items)))
    }

    pub async fn set(&self, items: Items) -> Result<StoreResponse> {
        if items.is_empty() {
            return Ok(StoreResponse::ok());
        }
        self.backend().await?.set(items).await
    }

    pub async fn remove(&self, keys: &[String]) -> Result<StoreResponse> {
        let backend = self.backend().await?;
        self.local.remove(keys)?;
        if backend.is_active() {
            return backend.remove(keys).await;
        }
        Ok(StoreResponse::ok())
    }

    pub async fn save_project(&self, name: &str, data: Value) -> Result<StoreResponse> {
        self.backend().await?.save_project(name, data).await
    }

    pub async fn load_project(&self, name: &str) -> Result<StoreResponse> {
        self.backend().await?.load_project(name).await
    }

    pub async fn create_project(&self, name: &str) -> Result<StoreResponse> {
        self.backend().await?.create_project(name).await
    }

    /// Delete the project and every namespaced key of its id, both in the
    /// backend and in the local store.
    ///
    /// Nothing is removed locally unless the backend confirmed the delete;
    /// pending offline writes may still reference those keys.
    pub async fn delete_project(&self, name: &str) -> Result<StoreResponse> {
        let name = match validate_project_name(name) {
            Ok(name) => name,
            Err(e) => return Ok(StoreResponse::error(e.to_string())),
        };
        let backend = self.backend().await?;
        let response = backend.delete_project(name).await?;
        if !response.is_ok() {
            warn!(project = name, "delete failed: {}", response.message_or_default());
            return Ok(response);
        }

        let keys = project_keys(name);
        if backend.is_active() {
            let removed = backend.remove(&keys).await?;
            if !removed.is_ok() {
                warn!(project = name, "namespaced keys not removed: {}", removed.message_or_default());
            }
        }
        self.local.remove(&keys)?;
        Ok(response)
    }

    pub async fn archive_project(&self, name: &str) -> Result<StoreResponse> {
        self.backend().await?.archive_project(name).await
    }

    pub async fn list_projects(&self) -> Result<StoreResponse> {
        self.backend().await?.list_projects().await
    }

    pub async fn save_paper(
        &self,
        project: &str,
        paper_id: &str,
        data: Value,
    ) -> Result<StoreResponse> {
        self.backend().await?.save_paper(project, paper_id, data).await
    }

    pub async fn load_paper(&self, project: &str, paper_id: &str) -> Result<StoreResponse> {
        self.backend().await?.load_paper(project, paper_id).await
    }

    pub async fn delete_paper(&self, project: &str, paper_id: &str) -> Result<StoreResponse> {
        self.backend().await?.delete_paper(project, paper_id).await
    }

    pub async fn list_papers(&self, project: &str) -> Result<StoreResponse> {
        self.backend().await?.list_papers(project).await
    }

    /// Disconnect the owned connection, if any
    pub fn shutdown(&self) {
        if let Some(connection) = lock(&self.connection).take() {
            connection.disconnect();
        }
    }
}
