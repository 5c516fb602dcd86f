//! Network transport surface
//!
//! Axum application exposing the WebSocket endpoint plus a minimal
//! liveness route that doubles as an HTTP probe target.

pub mod handlers;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::services::BusCore;

/// Build the router for the network transport
pub fn build_router(core: Arc<BusCore>) -> Router {
    Router::new()
        .route("/ws", get(handlers::websocket::websocket_handler))
        .route("/health", get(health))
        .with_state(core)
}

async fn health() -> &'static str {
    "ok"
}
