//! Offline write buffer and its replay after reconnection
//!
//! Writes made while the remote authority is unreachable land in the local
//! store next to three metadata keys. The flag marks that undelivered
//! writes exist; it is only cleared after the authority acknowledged the
//! replayed `storage_set`, so a failed or interrupted resync is retried on
//! the next open. Writes buffered while a replay is in flight keep the flag
//! set and are sent by a further pass.

use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::client::ActClient;
use crate::config::{BackupConfig, BackupKeyPolicy};
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::local::LocalStore;
use crate::lock;
use crate::protocol::{act, Items};
use crate::response::StoreResponse;

/// Set while undelivered writes exist
pub const BACKUP_FLAG_KEY: &str = "__marcalink_has_backup__";
/// Keys the pending writes touched
pub const BACKUP_KEYS_KEY: &str = "__backup_keys__";
/// RFC 3339 time of the latest offline write
pub const BACKUP_TIMESTAMP_KEY: &str = "__backup_timestamp__";

/// Replays per resync before giving up on a backup that keeps changing
const MAX_REPLAY_PASSES: usize = 3;

/// Pending offline writes as found in the local store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEnvelope {
    pub items: Items,
    pub backup_keys: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub backup_flag: bool,
}

/// Result of one resync attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResyncOutcome {
    /// No flag, or nothing left to send
    NothingToSync,
    /// This many items were acknowledged by the authority
    Replayed(usize),
    /// Replay did not complete; the backup stays in place
    Failed(String),
}

pub struct OfflineBackupQueue {
    local: Arc<dyn LocalStore>,
    client: ActClient,
    config: BackupConfig,
    resync_guard: tokio::sync::Mutex<()>,
    /// Serializes metadata writes against the post-ack clear
    meta_lock: Mutex<()>,
}

impl OfflineBackupQueue {
    pub fn new(local: Arc<dyn LocalStore>, client: ActClient, config: BackupConfig) -> Self {
        Self {
            local,
            client,
            config,
            resync_guard: tokio::sync::Mutex::new(()),
            meta_lock: Mutex::new(()),
        }
    }

    pub fn local_store(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    /// Store `items` locally and mark them for replay.
    ///
    /// Items and metadata go out in a single local write.
    pub fn backup(&self, items: Items) -> Result<StoreResponse> {
        if items.is_empty() {
            return Ok(StoreResponse::ok());
        }

        let _meta = lock(&self.meta_lock);
        let mut keys: Vec<String> = match self.config.key_policy {
            BackupKeyPolicy::Replace => Vec::new(),
            BackupKeyPolicy::Accumulate => self.tracked_keys()?,
        };
        for key in items.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }

        let count = items.len();
        let mut record = items;
        record.insert(BACKUP_KEYS_KEY.to_string(), json!(keys));
        record.insert(
            BACKUP_TIMESTAMP_KEY.to_string(),
            json!(Utc::now().to_rfc3339()),
        );
        record.insert(BACKUP_FLAG_KEY.to_string(), json!(true));
        self.local.set(record)?;

        info!("backed up {} item(s), {} key(s) pending", count, keys.len());
        Ok(StoreResponse::ok_with_message("Data saved as backup (offline)."))
    }

    /// The pending backup, if the flag is set
    pub fn pending(&self) -> Result<Option<BackupEnvelope>> {
        let meta = self.local.get(&metadata_keys())?;
        if !flag_set(&meta) {
            return Ok(None);
        }
        let backup_keys = keys_of(&meta);
        let items = self.local.get(&backup_keys)?;
        let timestamp = meta
            .get(BACKUP_TIMESTAMP_KEY)
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        Ok(Some(BackupEnvelope {
            items,
            backup_keys,
            timestamp,
            backup_flag: true,
        }))
    }

    pub fn has_pending(&self) -> Result<bool> {
        Ok(flag_set(&self.local.get(&[BACKUP_FLAG_KEY.to_string()])?))
    }

    /// Replay pending writes as one `storage_set`.
    ///
    /// Metadata is cleared only after an `ok` acknowledgment and only if no
    /// offline write landed meanwhile; otherwise the newer backup is sent in
    /// another pass. Item values stay in the local store as a cache. A
    /// resync started while another runs waits for it to finish.
    pub async fn resync(&self) -> ResyncOutcome {
        let _guard = self.resync_guard.lock().await;

        let mut replayed = 0;
        for _ in 0..MAX_REPLAY_PASSES {
            let envelope = match self.pending() {
                Ok(Some(envelope)) => envelope,
                Ok(None) => return finished(replayed),
                Err(e) => {
                    error!("cannot read backup: {}", e);
                    return ResyncOutcome::Failed(e.to_string());
                }
            };
            if envelope.backup_keys.is_empty() || envelope.items.is_empty() {
                debug!("backup flag without data, clearing");
                match self.clear_if_unchanged(&envelope) {
                    Ok(true) => return finished(replayed),
                    Ok(false) => continue,
                    Err(e) => return ResyncOutcome::Failed(e.to_string()),
                }
            }

            let count = envelope.items.len();
            info!("resyncing {} backed-up item(s)", count);
            let payload = json!({ "items": Value::Object(envelope.items.clone()) });
            let response = self
                .client
                .request_with_timeout(act::STORAGE_SET, payload, Some(self.config.resync_timeout()))
                .await;

            match response {
                Ok(response) if response.is_ok() => {
                    replayed += count;
                    match self.clear_if_unchanged(&envelope) {
                        Ok(true) => {
                            info!("resync acknowledged, {} item(s) replayed", replayed);
                            return ResyncOutcome::Replayed(replayed);
                        }
                        Ok(false) => debug!("backup changed during resync, replaying again"),
                        Err(e) => return ResyncOutcome::Failed(e.to_string()),
                    }
                }
                Ok(response) => {
                    let reason = response.message_or_default().to_string();
                    warn!("resync rejected: {}", reason);
                    return ResyncOutcome::Failed(reason);
                }
                Err(e) => {
                    warn!("resync failed: {}", e);
                    return ResyncOutcome::Failed(e.to_string());
                }
            }
        }

        warn!("backup kept changing, left for the next resync");
        ResyncOutcome::Failed("backup changed during resync".to_string())
    }

    /// Resync every time `connection` opens
    pub fn attach(self: &Arc<Self>, connection: &ConnectionManager) {
        let queue: Weak<Self> = Arc::downgrade(self);
        connection.on_open(move || {
            let Some(queue) = queue.upgrade() else {
                return;
            };
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        queue.resync().await;
                    });
                }
                Err(_) => warn!("no runtime to resync on"),
            }
        });
    }

    fn tracked_keys(&self) -> Result<Vec<String>> {
        let meta = self.local.get(&metadata_keys())?;
        Ok(if flag_set(&meta) { keys_of(&meta) } else { Vec::new() })
    }

    /// Clear the metadata if the backup still matches `sent`
    fn clear_if_unchanged(&self, sent: &BackupEnvelope) -> Result<bool> {
        let _meta = lock(&self.meta_lock);
        match self.pending()? {
            Some(current) if current == *sent => {
                self.local.remove(&metadata_keys())?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(true),
        }
    }
}

fn finished(replayed: usize) -> ResyncOutcome {
    if replayed > 0 {
        ResyncOutcome::Replayed(replayed)
    } else {
        ResyncOutcome::NothingToSync
    }
}

fn metadata_keys() -> Vec<String> {
    vec![
        BACKUP_FLAG_KEY.to_string(),
        BACKUP_KEYS_KEY.to_string(),
        BACKUP_TIMESTAMP_KEY.to_string(),
    ]
}

fn flag_set(meta: &Items) -> bool {
    meta.get(BACKUP_FLAG_KEY).and_then(Value::as_bool) == Some(true)
}

fn keys_of(meta: &Items) -> Vec<String> {
    meta.get(BACKUP_KEYS_KEY)
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(|key| key.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
