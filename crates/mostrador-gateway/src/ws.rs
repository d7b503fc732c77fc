// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime operator socket.
//!
//! The token comes from `Authorization: Bearer …` or `?token=` and is
//! verified before the upgrade. After that the connection is a [`Hub`]
//! member:
//!
//! Client -> Server (JSON):
//! ```json
//! {"type": "join_conversation", "conversation_id": "…"}
//! {"type": "typing", "conversation_id": "…", "is_typing": true}
//! {"type": "ping", "timestamp": 1760000000000}
//! ```
//!
//! Server -> Client frames are `{"event": …, "data": …, "timestamp": …}`.
//!
//! [`Hub`]: mostrador_bus::Hub

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::rejection::WebSocketUpgradeRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use mostrador_bus::{ClientCommand, ConnectionHandle, Hub, HubEvent};
use mostrador_core::MostradorError;

use crate::auth::bearer_token;
use crate::error::ApiError;
use crate::server::GatewayState;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler; rejects the handshake with 401 on a bad token.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<GatewayState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)
        .map(str::to_owned)
        .or(query.token)
        .ok_or_else(|| MostradorError::Unauthorized("missing token".into()))?;
    let principal = state.identity.verify(&token).await?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let hub = Arc::clone(&state.ctx.hub);
    Ok(ws
        .on_upgrade(move |socket| async move {
            let handle = hub.register(principal);
            handle_socket(socket, hub, handle).await;
        })
        .into_response())
}

fn ping_payload() -> Bytes {
    Bytes::from(Utc::now().timestamp_millis().to_string())
}

fn latency_from_pong(payload: &[u8]) -> Option<std::time::Duration> {
    let sent: i64 = std::str::from_utf8(payload).ok()?.parse().ok()?;
    let elapsed = Utc::now().timestamp_millis() - sent;
    u64::try_from(elapsed).ok().map(std::time::Duration::from_millis)
}

/// Pump frames both ways until either side closes or the hub drops the
/// connection.
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, handle: ConnectionHandle) {
    let ConnectionHandle {
        id,
        principal,
        mut rx,
        closed,
    } = handle;
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut ping = tokio::time::interval(hub.config().ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_sender.send(Message::Ping(ping_payload())).await.is_err() {
                    break;
                }
            }
            _ = closed.cancelled() => {
                tracing::debug!(connection = %id, "hub closed connection");
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
            incoming = ws_receiver.next() => {
                let Some(Ok(msg)) = incoming else { break };
                match msg {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientCommand>(text.as_str()) {
                            Ok(command) => hub.handle_command(&id, command),
                            Err(e) => {
                                hub.touch(&id);
                                tracing::debug!(connection = %id, error = %e, "invalid client command");
                                hub.send_to(
                                    &id,
                                    &HubEvent::Error {
                                        message: format!("invalid command: {e}"),
                                    },
                                );
                            }
                        }
                    }
                    Message::Pong(payload) => {
                        hub.touch(&id);
                        if let Some(latency) = latency_from_pong(&payload) {
                            hub.record_latency(&id, latency);
                        }
                    }
                    Message::Close(_) => break,
                    _ => hub.touch(&id),
                }
            }
        }
    }

    tracing::debug!(connection = %id, principal = %principal.id, "socket closed");
    hub.unregister(&id);
}
