//! Backend that forwards every call to the remote authority as one act

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{BackendKind, RemoteStoreBackend};
use crate::backup::OfflineBackupQueue;
use crate::client::ActClient;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::protocol::{act, Items};
use crate::response::StoreResponse;

/// Remote store reached through a [`ConnectionManager`].
///
/// Active only while the connection is open. Writes through [`set`] are
/// diverted to the offline backup while inactive or when the send fails;
/// every other call reports an error response instead.
///
/// [`set`]: RemoteStoreBackend::set
pub struct SocketBackend {
    client: ActClient,
    backup: Arc<OfflineBackupQueue>,
}

impl SocketBackend {
    pub fn new(client: ActClient, backup: Arc<OfflineBackupQueue>) -> Self {
        Self { client, backup }
    }

    pub fn connection(&self) -> &ConnectionManager {
        self.client.connection()
    }

    pub fn backup(&self) -> &Arc<OfflineBackupQueue> {
        &self.backup
    }

    /// Load a project and make it the connection's active project
    pub async fn open_project(&self, name: &str) -> Result<StoreResponse> {
        self.call(act::OPEN_PROJECT, json!({ "name": name })).await
    }

    async fn call(&self, act: &str, payload: Value) -> Result<StoreResponse> {
        match self.client.request(act, payload).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_transport() => {
                warn!(act, "remote store unreachable: {}", e);
                Ok(StoreResponse::error("WebSocket not connected"))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RemoteStoreBackend for SocketBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Socket
    }

    fn is_active(&self) -> bool {
        self.client.connection().is_open()
    }

    async fn save_project(&self, name: &str, data: Value) -> Result<StoreResponse> {
        self.call(act::SAVE_PROJECT, json!({ "projectName": name, "data": data }))
            .await
    }

    async fn load_project(&self, name: &str) -> Result<StoreResponse> {
        self.call(act::LOAD_PROJECT, json!({ "projectName": name }))
            .await
    }

    async fn create_project(&self, name: &str) -> Result<StoreResponse> {
        self.call(act::NEW_PROJECT, json!({ "name": name })).await
    }

    async fn delete_project(&self, name: &str) -> Result<StoreResponse> {
        self.call(act::DELETE_PROJECT, json!({ "name": name })).await
    }

    async fn archive_project(&self, name: &str) -> Result<StoreResponse> {
        self.call(act::ARCHIVE_PROJECT, json!({ "name": name })).await
    }

    async fn list_projects(&self) -> Result<StoreResponse> {
        self.call(act::LIST_PROJECT, json!({})).await
    }

    async fn save_paper(
        &self,
        project: &str,
        paper_id: &str,
        data: Value,
    ) -> Result<StoreResponse> {
        self.call(
            act::SAVE_PAPER,
            json!({ "projectName": project, "paperId": paper_id, "data": data }),
        )
        .await
    }

    async fn load_paper(&self, project: &str, paper_id: &str) -> Result<StoreResponse> {
        self.call(
            act::LOAD_PAPER,
            json!({ "projectName": project, "paperId": paper_id }),
        )
        .await
    }

    async fn delete_paper(&self, project: &str, paper_id: &str) -> Result<StoreResponse> {
        self.call(
            act::DELETE_PAPER,
            json!({ "projectName": project, "paperId": paper_id }),
        )
        .await
    }

    async fn list_papers(&self, project: &str) -> Result<StoreResponse> {
        self.call(act::LIST_PAPERS, json!({ "projectName": project }))
            .await
    }

    async fn get(&self, keys: &[String]) -> Result<StoreResponse> {
        self.call(act::STORAGE_GET, json!({ "keys": keys })).await
    }

    async fn set(&self, items: Items) -> Result<StoreResponse> {
        if !self.is_active() {
            info!("remote store offline, backing up {} item(s)", items.len());
            return self.backup.backup(items);
        }

        let payload = json!({ "items": Value::Object(items.clone()) });
        match self.client.request(act::STORAGE_SET, payload).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_transport() => {
                warn!("storage_set failed ({}), backing up {} item(s)", e, items.len());
                self.backup.backup(items)
            }
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, keys: &[String]) -> Result<StoreResponse> {
        self.call(act::STORAGE_REMOVE, json!({ "keys": keys })).await
    }
}
