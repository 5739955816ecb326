use super::ApiState;
use crate::session::SessionSnapshot;
use crate::state::SessionUpdate;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Client → Server message types
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Only forward these update kinds (e.g. "prediction", "alert_raised")
    #[serde(rename = "subscribe")]
    Subscribe { kinds: Vec<String> },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { kinds: Vec<String> },
}

/// Server → Client: full state sent once when the socket opens
#[derive(Serialize)]
struct SnapshotMessage {
    #[serde(rename = "type")]
    msg_type: &'static str,
    snapshot: SessionSnapshot,
}

/// GET /api/ws - WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    // Subscribe before taking the snapshot so no update falls in between
    let updates_rx = state.session.subscribe_updates();
    let snapshot = state.session.snapshot();

    ConnectionManager::new()
        .handle(socket, snapshot, updates_rx)
        .await;
}

/// Manages a single WebSocket connection with update-kind filters
pub struct ConnectionManager {
    /// Update kinds this connection wants; empty means all
    kinds: HashSet<String>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            kinds: HashSet::new(),
        }
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(
        mut self,
        mut socket: WebSocket,
        snapshot: SessionSnapshot,
        mut updates_rx: broadcast::Receiver<SessionUpdate>,
    ) {
        info!("WebSocket connection established");

        let initial = SnapshotMessage {
            msg_type: "snapshot",
            snapshot,
        };
        if let Err(e) = send_json(&mut socket, &initial).await {
            error!(error = %e, "Failed to send initial snapshot");
            return;
        }

        loop {
            tokio::select! {
                Some(msg) = socket.recv() => {
                    match msg {
                        Ok(Message::Text(text)) => {
                            if let Err(e) = self.handle_client_message(&text) {
                                warn!(error = %e, "Invalid client message");
                            }
                        }
                        Ok(Message::Close(_)) => {
                            info!("WebSocket client disconnected");
                            break;
                        }
                        Ok(Message::Ping(data)) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                error!(error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                result = updates_rx.recv() => {
                    match result {
                        Ok(update) => {
                            if self.should_forward(&update) {
                                if let Err(e) = send_json(&mut socket, &update).await {
                                    error!(error = %e, "Failed to send session update");
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "WebSocket lagged, skipped updates");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Session update channel closed");
                            break;
                        }
                    }
                }

                else => {
                    break;
                }
            }
        }

        info!("WebSocket connection closed");
    }

    fn handle_client_message(&mut self, text: &str) -> anyhow::Result<()> {
        match serde_json::from_str::<ClientMessage>(text)? {
            ClientMessage::Subscribe { kinds } => {
                info!(kinds = ?kinds, "Client filtered update kinds");
                self.kinds.extend(kinds);
            }
            ClientMessage::Unsubscribe { kinds } => {
                for kind in &kinds {
                    self.kinds.remove(kind);
                }
            }
        }
        Ok(())
    }

    fn should_forward(&self, update: &SessionUpdate) -> bool {
        self.kinds.is_empty() || self.kinds.contains(update.kind())
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, message: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string(message)?;
    socket.send(Message::Text(json)).await?;
    Ok(())
}
