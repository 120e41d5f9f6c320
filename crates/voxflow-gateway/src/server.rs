//! Axum-based WebSocket server.

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

/// Start the gateway WebSocket server and serve until shutdown.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state
        .config
        .gateway
        .as_ref()
        .and_then(|g| g.bind.clone())
        .unwrap_or_else(|| "0.0.0.0".to_string());

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "streams": state.admission.active_count(),
        "sessions": state.sessions.len(),
        "pending_buffers": state.assembler.pending_count(),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(%e, "Failed to install CTRL+C handler");
        return;
    }
    info!("Shutdown signal received");
}
