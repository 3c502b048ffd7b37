// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the room relay over real WebSocket connections.
//!
//! Covers join/leave notices, message fan-out, fail-soft handling of bad
//! frames, implicit leave on disconnect, and the idle heartbeat timeout.
//!
//! Verification command: `cargo test --test room_relay`

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use healthai_proto::codec;
use healthai_proto::event::{InboundEvent, RoomRequest};
use healthai_server::config::ServerConfig;
use healthai_server::relay::RelayState;
use healthai_server::server::{AppState, start_server_with_state};

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a server on a random port and returns its address and state.
///
/// The returned `TempDir` must outlive the test (it backs the model store).
async fn start_relay(config: ServerConfig) -> (SocketAddr, AppState, TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        model_dir: tmp.path().to_path_buf(),
        ..config
    };
    let state = AppState::from_config(&config).await.unwrap();
    let (addr, _handle) = start_server_with_state(&config, state.clone())
        .await
        .expect("failed to start test server");
    (addr, state, tmp)
}

async fn connect(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

/// Attempts a handshake carrying an `Origin` header.
async fn connect_from(
    addr: SocketAddr,
    origin: &'static str,
) -> Result<WsStream, tungstenite::Error> {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static(origin));
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(ws, _)| ws)
}

async fn send_event(ws: &mut WsStream, event: &InboundEvent) {
    let text = codec::encode_inbound(event).unwrap();
    send_text(ws, &text).await;
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(tungstenite::Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

async fn join(ws: &mut WsStream, room: &str, name: Option<&str>) {
    send_event(ws, &InboundEvent::JoinRoom(RoomRequest::new(room, name))).await;
}

async fn leave(ws: &mut WsStream, room: &str, name: Option<&str>) {
    send_event(ws, &InboundEvent::LeaveRoom(RoomRequest::new(room, name))).await;
}

/// Receives the next event as JSON, skipping control frames.
async fn recv_event(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("recv timed out")
            .unwrap()
            .unwrap();
        match msg {
            tungstenite::Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Asserts that no event arrives within a short window.
async fn assert_silent(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

/// Polls until `room` has `count` members or a few seconds pass.
async fn wait_for_members(relay: &RelayState, room: &str, count: usize) {
    for _ in 0..100 {
        if relay.rooms.members(room).await.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("room {room} never reached {count} members");
}

/// Polls until the relay holds `count` open connections.
async fn wait_for_connections(relay: &RelayState, count: usize) {
    for _ in 0..100 {
        if relay.connection_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("connection count never reached {count}");
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn lone_member_receives_own_join_notice() {
    let (addr, _state, _tmp) = start_relay(ServerConfig::default()).await;
    let mut alice = connect(addr).await;

    join(&mut alice, "lobby", Some("Alice")).await;

    assert_eq!(
        recv_event(&mut alice).await,
        json!({"event": "joinRoom", "data": {"name": "System", "message": "Alice joined."}})
    );
}

#[tokio::test]
async fn message_reaches_every_member_including_sender() {
    let (addr, _state, _tmp) = start_relay(ServerConfig::default()).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    join(&mut alice, "lobby", Some("Alice")).await;
    recv_event(&mut alice).await;
    join(&mut bob, "lobby", Some("Bob")).await;
    assert_eq!(recv_event(&mut alice).await["data"]["message"], "Bob joined.");
    assert_eq!(recv_event(&mut bob).await["data"]["message"], "Bob joined.");

    send_text(
        &mut alice,
        r#"{"event":"send_message","data":{"room":"lobby","text":"hi"}}"#,
    )
    .await;

    let expected = json!({"event": "message", "data": {"room": "lobby", "text": "hi"}});
    assert_eq!(recv_event(&mut alice).await, expected);
    assert_eq!(recv_event(&mut bob).await, expected);
}

#[tokio::test]
async fn message_fields_are_forwarded_unchanged() {
    let (addr, _state, _tmp) = start_relay(ServerConfig::default()).await;
    let mut alice = connect(addr).await;
    join(&mut alice, "consult-42", None).await;
    recv_event(&mut alice).await;

    let text = r#"{"event":"send_message","data":{"room":"consult-42","sender":"Dr. Who","senderemail":"who@example.com","message":"Take two","attachments":[{"id":1}],"urgent":true}}"#;
    send_text(&mut alice, text).await;

    let received = recv_event(&mut alice).await;
    let sent: Value = serde_json::from_str(text).unwrap();
    assert_eq!(received["event"], "message");
    assert_eq!(received["data"], sent["data"]);
}

#[tokio::test]
async fn leave_notifies_remaining_members_with_guest_default() {
    let (addr, state, _tmp) = start_relay(ServerConfig::default()).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    join(&mut alice, "lobby", Some("Alice")).await;
    recv_event(&mut alice).await;
    join(&mut bob, "lobby", None).await;
    recv_event(&mut alice).await;
    recv_event(&mut bob).await;

    leave(&mut bob, "lobby", None).await;

    assert_eq!(
        recv_event(&mut alice).await,
        json!({"event": "leftRoom", "data": {"name": "System", "message": "Guest left."}})
    );
    assert_silent(&mut bob).await;
    assert_eq!(state.relay.rooms.members("lobby").await.len(), 1);
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (addr, _state, _tmp) = start_relay(ServerConfig::default()).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    join(&mut alice, "room-a", None).await;
    recv_event(&mut alice).await;
    join(&mut bob, "room-b", None).await;
    recv_event(&mut bob).await;

    send_text(
        &mut alice,
        r#"{"event":"send_message","data":{"room":"room-a","text":"private"}}"#,
    )
    .await;

    assert_eq!(recv_event(&mut alice).await["data"]["text"], "private");
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn join_without_room_is_silently_ignored() {
    let (addr, state, _tmp) = start_relay(ServerConfig::default()).await;
    let mut alice = connect(addr).await;

    send_text(&mut alice, r#"{"event":"join_room","data":{"name":"Alice"}}"#).await;
    send_text(&mut alice, r#"{"event":"join_room","data":{"room":""}}"#).await;

    assert_silent(&mut alice).await;
    assert_eq!(state.relay.rooms.room_count().await, 0);
}

#[tokio::test]
async fn send_without_room_is_silently_ignored() {
    let (addr, _state, _tmp) = start_relay(ServerConfig::default()).await;
    let mut alice = connect(addr).await;
    join(&mut alice, "lobby", None).await;
    recv_event(&mut alice).await;

    send_text(&mut alice, r#"{"event":"send_message","data":{"text":"lost"}}"#).await;

    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn bad_frames_keep_connection_alive() {
    let (addr, _state, _tmp) = start_relay(ServerConfig::default()).await;
    let mut alice = connect(addr).await;

    send_text(&mut alice, "garbage").await;
    send_text(&mut alice, r#"{"event":"typing","data":{"room":"lobby"}}"#).await;
    send_text(&mut alice, r#"{"event":"send_message","data":"not an object"}"#).await;
    alice
        .send(tungstenite::Message::Binary(vec![1, 2, 3].into()))
        .await
        .unwrap();

    join(&mut alice, "lobby", Some("Alice")).await;
    assert_eq!(recv_event(&mut alice).await["data"]["message"], "Alice joined.");
}

#[tokio::test]
async fn disconnect_removes_connection_from_all_rooms() {
    let (addr, state, _tmp) = start_relay(ServerConfig::default()).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    join(&mut alice, "r1", None).await;
    recv_event(&mut alice).await;
    join(&mut bob, "r1", None).await;
    join(&mut bob, "r2", None).await;
    recv_event(&mut alice).await;

    wait_for_members(&state.relay, "r1", 2).await;
    wait_for_members(&state.relay, "r2", 1).await;

    bob.close(None).await.unwrap();
    drop(bob);

    wait_for_members(&state.relay, "r1", 1).await;
    assert_eq!(state.relay.rooms.members("r2").await.len(), 0);
    assert_eq!(state.relay.rooms.room_count().await, 1);

    // No departure notice on implicit leave.
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn idle_connection_is_closed_after_ping_timeout() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(200),
        ping_timeout: Duration::from_millis(600),
        ..ServerConfig::default()
    };
    let (addr, state, _tmp) = start_relay(config).await;

    // Never read or write: no pong goes back, so the server sees silence.
    let _idle = connect(addr).await;
    wait_for_connections(&state.relay, 1).await;
    wait_for_connections(&state.relay, 0).await;
}

#[tokio::test]
async fn active_connection_survives_ping_timeout() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(200),
        ping_timeout: Duration::from_millis(600),
        ..ServerConfig::default()
    };
    let (addr, state, _tmp) = start_relay(config).await;
    let mut alice = connect(addr).await;

    for _ in 0..6 {
        send_text(&mut alice, r#"{"event":"send_message","data":{"room":"nobody"}}"#).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    assert_eq!(state.relay.connection_count().await, 1);
    join(&mut alice, "lobby", None).await;
    assert_eq!(recv_event(&mut alice).await["event"], "joinRoom");
}

#[tokio::test]
async fn handshake_from_allowed_origin_succeeds() {
    let (addr, _state, _tmp) = start_relay(ServerConfig::default()).await;
    let mut alice = connect_from(addr, "http://localhost:5173").await.unwrap();

    join(&mut alice, "lobby", None).await;
    assert_eq!(recv_event(&mut alice).await["event"], "joinRoom");
}

#[tokio::test]
async fn handshake_from_disallowed_origin_is_rejected() {
    let (addr, state, _tmp) = start_relay(ServerConfig::default()).await;

    match connect_from(addr, "https://attacker.example").await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 403),
        Err(other) => panic!("expected HTTP 403, got {other:?}"),
        Ok(_) => panic!("handshake from disallowed origin succeeded"),
    }
    assert_eq!(state.relay.connection_count().await, 0);
}

#[tokio::test]
async fn oversized_message_is_refused_by_transport() {
    let config = ServerConfig {
        max_payload_size: 1024,
        ..ServerConfig::default()
    };
    let (addr, state, _tmp) = start_relay(config).await;
    let mut alice = connect(addr).await;
    wait_for_connections(&state.relay, 1).await;

    let padding = "x".repeat(4096);
    let _ = alice
        .send(tungstenite::Message::Text(
            format!(r#"{{"event":"join_room","data":{{"room":"lobby","pad":"{padding}"}}}}"#).into(),
        ))
        .await;

    wait_for_connections(&state.relay, 0).await;
    assert_eq!(state.relay.rooms.room_count().await, 0);
}
