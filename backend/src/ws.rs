//! Authenticated WebSocket endpoint and the notification broadcast hub.
//!
//! The connection is receive-only from the client's perspective: the
//! server pushes `{"type": "notification", "data": {...}}` events and
//! ignores everything the client sends except close frames. There is no
//! offline delivery; a client that reconnects re-fetches notifications
//! over REST.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use shared::{Notification, NotificationEvent};

use crate::rest::AppState;

/// Outbound buffer per connection; a client that stops reading loses
/// events rather than stalling the broadcaster.
const SEND_BUFFER: usize = 64;

/// Process-wide registry of live connections, keyed by user id so a
/// broadcast only touches the owning user's sockets.
#[derive(Default)]
pub struct NotificationHub {
    connections: DashMap<String, DashMap<String, mpsc::Sender<String>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, user_id: &str, conn_id: &str, tx: mpsc::Sender<String>) {
        self.connections
            .entry(user_id.to_string())
            .or_default()
            .insert(conn_id.to_string(), tx);
    }

    fn unregister(&self, user_id: &str, conn_id: &str) {
        if let Some(conns) = self.connections.get(user_id) {
            conns.remove(conn_id);
        }
        self.connections
            .remove_if(user_id, |_, conns| conns.is_empty());
    }

    /// Push a notification to every live connection of `owner_id`.
    ///
    /// Having no connection is the normal case, not a failure: the
    /// notification row already exists and the client catches up on its
    /// next list fetch.
    pub fn broadcast(&self, owner_id: &str, notification: &Notification) {
        let Some(conns) = self.connections.get(owner_id) else {
            return;
        };
        let payload = match serde_json::to_string(&NotificationEvent::new(notification)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("failed to serialize notification event: {e}");
                return;
            }
        };
        for entry in conns.iter() {
            // A full or closed channel means the connection is on its way
            // out; skip it silently.
            let _ = entry.value().try_send(payload.clone());
        }
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .get(user_id)
            .map(|conns| conns.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    token: Option<String>,
}

/// Upgrade handler for `GET /api/ws?token=...`.
///
/// The session is checked before the upgrade completes; an invalid or
/// missing token never reaches the broadcast pool.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsAuthQuery>,
    State(state): State<AppState>,
) -> Response {
    let user_id = query
        .token
        .as_deref()
        .and_then(|token| state.sessions.resolve(token));
    match user_id {
        Some(user_id) => {
            let hub = state.hub.clone();
            ws.on_upgrade(move |socket| handle_socket(socket, hub, user_id))
        }
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// Drive one connection: forward hub events out, drain (and ignore)
/// client frames until close. The user tag is fixed at handshake time.
async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>, user_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let conn_id = uuid::Uuid::new_v4().to_string();

    let (tx, mut rx) = mpsc::channel::<String>(SEND_BUFFER);
    hub.register(&user_id, &conn_id, tx);
    tracing::info!(user_id, conn_id, "websocket connected");

    let sender_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Close(_) => break,
            // No client -> server message types are defined.
            _ => {}
        }
    }

    hub.unregister(&user_id, &conn_id);
    sender_task.abort();
    tracing::info!(user_id, conn_id, "websocket disconnected");
}
