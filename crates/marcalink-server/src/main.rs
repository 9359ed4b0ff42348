//! Marcalink Server Binary
//!
//! Serves the marcalink store over WebSocket.

use std::path::PathBuf;
use std::sync::Arc;

use marcalink_server::{serve, AppState};
use marcalink_store::MarcalinkConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = MarcalinkConfig::load_standard().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        MarcalinkConfig::default()
    });

    let addr = std::env::var("MARCALINK_ADDR").unwrap_or(config.server.addr);
    let data_dir = std::env::var_os("MARCALINK_DATA_DIR")
        .map(PathBuf::from)
        .or(config.server.data_dir)
        .or_else(|| config.storage.resolved_data_dir())
        .unwrap_or_else(|| PathBuf::from("user_data"));

    tracing::info!("Serving data from {:?}", data_dir);
    let state = Arc::new(AppState::new(data_dir)?);
    serve(&addr, state).await
}
