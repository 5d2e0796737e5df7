//! Dashboard WebSocket endpoint.
//!
//! Flow:
//! 1. Client connects to `/api/v1/ws/dashboard/{user_id}`
//! 2. Client sends `{"action": "subscribe", "channel": "dashboard_updates"}`
//! 3. The server answers with a typed subscription response and starts
//!    pushing matching envelopes
//! 4. Any send failure or socket close removes the user from all maps

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use tarsy_broadcast::SubscriptionAction;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct SubscriptionRequest {
    action: SubscriptionAction,
    channel: String,
}

/// GET /api/v1/ws/dashboard/:user_id, upgrade to WebSocket.
pub async fn dashboard_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Outbound channel: the connection manager pushes serialized envelopes
    // here; the writer task forwards them to the socket.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);
    state.connections.connect(&user_id, outbound_tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if ws_sink.send(Message::Text(message)).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: subscription management only; everything else flows
    // server -> client.
    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<SubscriptionRequest>(&text) {
                Ok(request) => {
                    let response = state.connections.handle_subscription(
                        &user_id,
                        request.action,
                        &request.channel,
                    );
                    let serialized = serde_json::to_string(&response)
                        .unwrap_or_else(|_| "{\"success\":false}".into());
                    if !state.connections.send_to_user(&user_id, serialized).await {
                        break;
                    }
                }
                Err(_) => {
                    tracing::debug!(user_id = %user_id, "ignoring unparseable dashboard message");
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                // axum answers WS-level pings automatically.
            }
            _ => {}
        }
    }

    writer.abort();
    state.connections.disconnect(&user_id);
    tracing::info!(user_id = %user_id, "dashboard socket closed");
}
