//! Shared helpers for marcalink-store integration tests

#![allow(dead_code)]

pub mod peer;

use std::time::Duration;

use marcalink_store::{BackendMode, ConnectionConfig, Items, MarcalinkConfig, StorageConfig};
use serde_json::Value;

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A localhost port nothing is listening on (until a test binds it again)
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Connection settings for a local peer with fast retries
pub fn fast_connection(port: u16) -> ConnectionConfig {
    ConnectionConfig {
        url: "ws://127.0.0.1".to_string(),
        port: port.to_string(),
        base_backoff_ms: 20,
        max_backoff_ms: 160,
        ..ConnectionConfig::default()
    }
}

/// Facade configuration pinned to the socket backend
pub fn socket_config(port: u16) -> MarcalinkConfig {
    MarcalinkConfig {
        storage: StorageConfig {
            mode: BackendMode::Socket,
            ..StorageConfig::default()
        },
        connection: fast_connection(port),
        ..MarcalinkConfig::default()
    }
}

/// Facade configuration pinned to the filesystem backend
pub fn filesystem_config(dir: &std::path::Path) -> MarcalinkConfig {
    MarcalinkConfig {
        storage: StorageConfig {
            mode: BackendMode::Filesystem,
            data_dir: Some(dir.to_path_buf()),
            fallback_path: None,
        },
        ..MarcalinkConfig::default()
    }
}

pub fn items(value: Value) -> Items {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

pub fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
