//! WebSocket endpoint a companion peer connects to. Each connection is
//! attached to the shared [`RelayHub`]; frames are pumped in both directions
//! until either side closes.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::hub::RelayHub;
use crate::config::RelayConfig;

/// Accepts upgrades on any path.
pub fn router(hub: Arc<RelayHub>) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .fallback(ws_upgrade)
        .with_state(hub)
}

async fn ws_upgrade(State(hub): State<Arc<RelayHub>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<RelayHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (peer_id, mut outbound) = hub.attach_peer().await;

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            match message.to_text() {
                Ok(text) => {
                    debug!("Sending relay message of type: {}", message.kind());
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to serialize relay message: {}", e),
            }
        }
        let _ = sender.close().await;
    });

    let recv_hub = Arc::clone(&hub);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => recv_hub.handle_inbound(peer_id, text.as_str()).await,
                Message::Binary(data) => {
                    warn!("Ignoring {} byte binary frame from relay peer", data.len());
                }
                Message::Close(_) => {
                    info!("Relay peer {} closed the connection", peer_id);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.detach_peer(peer_id);
}

/// Pings the connected peer every `interval`.
pub fn spawn_ping_loop(hub: Arc<RelayHub>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if hub.is_connected() {
                hub.send_ping().await;
            }
        }
    })
}

/// Binds the relay endpoint. Failing here is a startup error.
pub async fn bind(config: &RelayConfig) -> anyhow::Result<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind relay endpoint {}: {}", addr, e))?;
    info!("Relay WebSocket server listening on ws://{}", addr);
    Ok(listener)
}

/// Serves peers on an already bound listener until it fails.
pub async fn serve(
    listener: TcpListener,
    hub: Arc<RelayHub>,
    ping_interval: Duration,
) -> anyhow::Result<()> {
    let ping_loop = spawn_ping_loop(Arc::clone(&hub), ping_interval);
    let result = axum::serve(listener, router(hub)).await;
    ping_loop.abort();

    result.map_err(|e| anyhow::anyhow!("Relay server error: {}", e))
}
