//! WebSocket connection handler
//!
//! Handles WebSocket connections from network clients. Each connection
//! becomes a bus session; frames are raw envelope JSON in both directions.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::services::BusCore;

/// WebSocket upgrade endpoint
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(core): State<Arc<BusCore>>,
) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, core))
}

/// Handle individual WebSocket connection
async fn handle_websocket(socket: WebSocket, core: Arc<BusCore>) {
    let (mut sender, mut receiver) = socket.split();
    let (session_id, mut outbound_rx) = core.register_network_session().await;
    info!("🔗 New WebSocket connection: {}", session_id);

    // Outgoing envelopes; drains whatever is queued once the router drops
    // the session's sender, then closes the socket
    let writer_id = session_id.clone();
    let outgoing_task = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize envelope for {}: {}", writer_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        debug!("Outgoing task ended for {}", writer_id);
    });

    // Incoming frames
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!("WebSocket error for {}: {}", session_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                core.handle_incoming(&session_id, &text).await;
            }
            Message::Binary(_) => {
                warn!("Binary frame from {} not supported", session_id);
            }
            Message::Ping(_) | Message::Pong(_) => {
                // envelope-level ping/pong is the liveness protocol; frame
                // level still counts as traffic
                core.router.touch(&session_id).await;
            }
            Message::Close(_) => {
                info!("Session {} requested close", session_id);
                break;
            }
        }
    }

    core.disconnect(&session_id).await;
    outgoing_task.abort();
    info!("👋 WebSocket connection closed: {}", session_id);
}
