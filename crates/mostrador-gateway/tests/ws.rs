// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operator sockets against a live listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use mostrador_core::{ControlMode, ConversationStore, Role};
use mostrador_gateway::{GatewayState, HealthState, WebhookSettings, build_router};
use mostrador_test_utils::{StaticIdentity, TestHarness};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(h: &TestHarness) -> SocketAddr {
    let identity = StaticIdentity::new()
        .with_principal("agent-token", "ana", Role::Agent)
        .with_principal("sup-token", "sofia", Role::Supervisor);
    let state = GatewayState {
        ctx: Arc::clone(&h.ctx),
        identity: Arc::new(identity),
        webhook: WebhookSettings::default(),
        health: HealthState {
            start_time: Instant::now(),
            prometheus_render: None,
        },
    };
    let app = build_router(state, &[]);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, token: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .expect("websocket handshake");
    socket
}

async fn send(socket: &mut Socket, command: Value) {
    socket
        .send(WsMessage::Text(command.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON frame whose `event` is `name`, skipping everything else.
async fn next_event(socket: &mut Socket, name: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let frame = socket
                .next()
                .await
                .expect("socket closed early")
                .expect("read frame");
            if let WsMessage::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["event"] == name {
                    return value;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no `{name}` event before timeout"))
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let h = TestHarness::new();
    let addr = spawn_server(&h).await;
    let mut socket = connect(addr, "agent-token").await;

    send(&mut socket, json!({"type": "ping", "timestamp": 1_000})).await;
    let pong = next_event(&mut socket, "pong").await;
    assert_eq!(pong["data"]["client_timestamp"], 1_000);
    assert!(pong["timestamp"].is_string());
}

#[tokio::test]
async fn joined_operators_see_mode_changes_and_presence() {
    let h = TestHarness::new();
    let addr = spawn_server(&h).await;
    let conversation = h
        .store
        .get_or_create_conversation("+5215550001", None)
        .await
        .unwrap();

    let mut ana = connect(addr, "agent-token").await;
    send(
        &mut ana,
        json!({"type": "join_conversation", "conversation_id": conversation.id}),
    )
    .await;
    let joined = next_event(&mut ana, "joined_conversation").await;
    assert_eq!(joined["data"]["conversation_id"], json!(conversation.id));

    let _sofia = connect(addr, "sup-token").await;
    let connected = next_event(&mut ana, "user_connected").await;
    assert_eq!(connected["data"]["principal_id"], "sofia");

    h.ctx
        .control
        .set_mode(&conversation.id, ControlMode::Takeover, Some("ana"), None)
        .await
        .unwrap();
    let changed = next_event(&mut ana, "conversation_mode_changed").await;
    assert_eq!(changed["data"]["new_mode"], "takeover");
    assert_eq!(changed["data"]["assigned_agent_id"], "ana");

    assert_eq!(h.hub.stats().connections, 2);
}

#[tokio::test]
async fn malformed_commands_get_an_error_frame() {
    let h = TestHarness::new();
    let addr = spawn_server(&h).await;
    let mut socket = connect(addr, "agent-token").await;

    socket
        .send(WsMessage::Text("{\"type\":\"dance\"}".into()))
        .await
        .unwrap();
    let error = next_event(&mut socket, "error").await;
    assert!(error["data"]["message"].is_string());
}

#[tokio::test]
async fn closing_the_socket_unregisters_the_operator() {
    let h = TestHarness::new();
    let addr = spawn_server(&h).await;
    let mut socket = connect(addr, "agent-token").await;
    send(&mut socket, json!({"type": "ping", "timestamp": 1})).await;
    next_event(&mut socket, "pong").await;
    assert_eq!(h.hub.connected_principals().len(), 1);

    socket.close(None).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while !h.hub.connected_principals().is_empty() {
        assert!(Instant::now() < deadline, "connection was not unregistered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn handshake_with_unknown_token_is_refused() {
    let h = TestHarness::new();
    let addr = spawn_server(&h).await;
    assert!(connect_async(format!("ws://{addr}/ws?token=nope")).await.is_err());
}
