//! WebSocket endpoint: one dispatcher per connection

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use marcalink_store::Envelope;

use crate::AppState;

/// Upgrade handler for `/`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("client connected");
    let mut dispatcher = state.dispatcher();

    if send(&mut socket, &crate::Dispatcher::greeting()).await.is_err() {
        return;
    }

    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        };
        tracing::debug!("received: {}", text.as_str());

        let reply = dispatcher.handle_text(text.as_str()).await;
        if send(&mut socket, &reply).await.is_err() {
            break;
        }
    }

    tracing::info!("client disconnected");
}

async fn send(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), ()> {
    let text = match envelope.to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("failed to encode reply: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await.map_err(|e| {
        tracing::warn!("failed to send reply: {}", e);
    })
}
