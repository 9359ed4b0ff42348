//! Always-available local key/value store
//!
//! Plays the part of the client's local storage area: the facade reads from
//! it when the remote authority is unreachable, and the offline backup queue
//! writes undelivered items into it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::lock;
use crate::protocol::Items;

/// Flat key/value store that is always reachable
pub trait LocalStore: Send + Sync {
    /// Values for the given keys; absent keys are omitted
    fn get(&self, keys: &[String]) -> Result<Items>;

    /// Every stored key
    fn get_all(&self) -> Result<Items>;

    /// Shallow-merge `items` into the store in one write
    fn set(&self, items: Items) -> Result<()>;

    /// Remove keys; missing keys are ignored
    fn remove(&self, keys: &[String]) -> Result<()>;
}

fn select(items: &Items, keys: &[String]) -> Items {
    keys.iter()
        .filter_map(|key| items.get(key).map(|value| (key.clone(), value.clone())))
        .collect()
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<Items>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, keys: &[String]) -> Result<Items> {
        Ok(select(&lock(&self.items), keys))
    }

    fn get_all(&self) -> Result<Items> {
        Ok(lock(&self.items).clone())
    }

    fn set(&self, items: Items) -> Result<()> {
        lock(&self.items).extend(items);
        Ok(())
    }

    fn remove(&self, keys: &[String]) -> Result<()> {
        let mut stored = lock(&self.items);
        for key in keys {
            stored.shift_remove(key);
        }
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk.
///
/// Every mutation rewrites the whole file through a temp file and rename, so
/// a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    items: Mutex<Items>,
}

impl JsonFileStore {
    /// Open (or create on first write) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items = match read_json(&path)? {
            Some(Value::Object(items)) => items,
            Some(_) => {
                warn!("Local store {:?} is not a JSON object, starting empty", path);
                Items::new()
            }
            None => Items::new(),
        };
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, items: &Items) -> Result<()> {
        write_json_atomic(&self.path, &Value::Object(items.clone()))
    }
}

impl LocalStore for JsonFileStore {
    fn get(&self, keys: &[String]) -> Result<Items> {
        Ok(select(&lock(&self.items), keys))
    }

    fn get_all(&self) -> Result<Items> {
        Ok(lock(&self.items).clone())
    }

    fn set(&self, items: Items) -> Result<()> {
        let mut stored = lock(&self.items);
        let mut next = stored.clone();
        next.extend(items);
        self.persist(&next)?;
        *stored = next;
        Ok(())
    }

    fn remove(&self, keys: &[String]) -> Result<()> {
        let mut stored = lock(&self.items);
        let mut next = stored.clone();
        for key in keys {
            next.shift_remove(key);
        }
        self.persist(&next)?;
        *stored = next;
        Ok(())
    }
}

/// Read a JSON file; `None` when missing or not valid JSON
pub(crate) fn read_json(path: &Path) -> Result<Option<Value>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("Ignoring unreadable JSON at {:?}: {}", path, e);
            Ok(None)
        }
    }
}

/// Write pretty JSON via a sibling temp file and rename
pub(crate) fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let text = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, text).map_err(|e| StoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}
