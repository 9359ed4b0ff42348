//! Configuration for marcalink-store
//!
//! Loaded from `<config_dir>/marcalink/config.toml` when present; every
//! section and field falls back to its default.
//!
//! ```toml
//! [storage]
//! mode = "auto"            # "auto" | "filesystem" | "socket"
//! data_dir = "/home/me/.local/share/marcalink"
//!
//! [connection]
//! url = "ws://localhost"
//! port = "8080"
//! base_backoff_ms = 100
//! max_backoff_ms = 60000
//! correlation = "act"      # "act" | "request_id"
//!
//! [backup]
//! key_policy = "replace"   # "replace" | "accumulate"
//! resync_timeout_ms = 10000
//!
//! [server]
//! addr = "127.0.0.1:8080"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarcalinkConfig {
    pub storage: StorageConfig,
    pub connection: ConnectionConfig,
    pub backup: BackupConfig,
    pub server: ServerConfig,
}

impl MarcalinkConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Load from the standard location, or defaults when no file exists
    pub fn load_standard() -> Result<Self> {
        match Self::standard_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config_dir>/marcalink/config.toml`
    pub fn standard_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("marcalink").join("config.toml"))
    }
}

/// Which backend variant the facade resolves to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Filesystem when the data directory can be created, socket otherwise
    #[default]
    Auto,
    Filesystem,
    Socket,
}

/// Storage configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: BackendMode,
    /// Base directory of the filesystem backend
    pub data_dir: Option<PathBuf>,
    /// File backing the local fallback store (in memory when unset)
    pub fallback_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured data directory, or `<data_dir>/marcalink`
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("marcalink")))
    }
}

/// How socket responses are matched to requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// One handler per act name; all in-flight requests of an act share the next response
    #[default]
    Act,
    /// Each request carries a unique id echoed by the authority
    RequestId,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: String,
    pub port: String,
    /// First reconnect delay, also the value restored after a successful open
    pub base_backoff_ms: u64,
    /// Reconnect delay ceiling
    pub max_backoff_ms: u64,
    /// Entries kept in the operational log
    pub log_capacity: usize,
    pub correlation: CorrelationMode,
    /// Unset: requests wait for their response indefinitely
    pub request_timeout_ms: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost".to_string(),
            port: "8080".to_string(),
            base_backoff_ms: 100,
            max_backoff_ms: 60_000,
            log_capacity: 500,
            correlation: CorrelationMode::Act,
            request_timeout_ms: None,
        }
    }
}

impl ConnectionConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// How a second offline write treats the tracked key list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKeyPolicy {
    /// The newest offline write's keys replace the tracked list
    #[default]
    Replace,
    /// Tracked keys are the union of every offline write since the last resync
    Accumulate,
}

/// Offline backup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub key_policy: BackupKeyPolicy,
    /// How long a resync waits for the replay acknowledgment
    pub resync_timeout_ms: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            key_policy: BackupKeyPolicy::Replace,
            resync_timeout_ms: 10_000,
        }
    }
}

impl BackupConfig {
    pub fn resync_timeout(&self) -> Duration {
        Duration::from_millis(self.resync_timeout_ms)
    }
}

/// Settings for the authority side of the protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            data_dir: None,
        }
    }
}
