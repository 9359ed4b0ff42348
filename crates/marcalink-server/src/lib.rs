//! Marcalink Server - remote authority for the marcalink store
//!
//! Accepts WebSocket connections at `/` and answers every act of the wire
//! protocol from a [`FilesystemBackend`].

pub mod dispatch;
pub mod websocket;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{routing::get, Router};
use marcalink_store::FilesystemBackend;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use dispatch::Dispatcher;

/// Shared application state
pub struct AppState {
    pub backend: Arc<FilesystemBackend>,
}

impl AppState {
    /// State serving the store rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> marcalink_store::Result<Self> {
        Ok(Self {
            backend: Arc::new(FilesystemBackend::open(data_dir)?),
        })
    }

    /// A dispatcher for one new connection
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.backend))
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the server
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Marcalink server listening on ws://{}", listener.local_addr()?);
    serve_listener(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
