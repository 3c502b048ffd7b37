//! Relay core: connection table, WebSocket handler, and room fan-out.
//!
//! Every upgraded socket gets a [`ConnectionId`] and an outbound channel.
//! Clients send `join_room`, `leave_room` and `send_message` events; the
//! relay updates the [`RoomRegistry`] and pushes `joinRoom`, `leftRoom` and
//! `message` events to the affected members.
//!
//! Delivery is best-effort. Malformed frames, events without a room, and
//! recipients whose channel has closed are skipped without telling the
//! sender.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use healthai_proto::codec::{self, CodecError};
use healthai_proto::event::{InboundEvent, MessagePayload, OutboundEvent, RoomRequest, SystemNotice};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::rooms::{ConnectionId, RoomRegistry};

/// Default maximum accepted frame size in bytes (64 KB).
const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;
/// Default interval between server pings.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
/// Default silence allowed before a socket is closed.
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared relay state holding the connection table and room registry.
pub struct RelayState {
    /// Maps each open connection to the sender half of its outbound channel.
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    /// Room membership for every open connection.
    pub rooms: RoomRegistry,
    /// Frames larger than this are refused.
    max_payload_size: usize,
    ping_interval: Duration,
    ping_timeout: Duration,
    /// Browser origins allowed to open a socket.
    allowed_origins: Vec<String>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay with no connections and default limits.
    ///
    /// No browser origin is allowed; only clients that send no `Origin`
    /// header can connect.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(
            DEFAULT_MAX_PAYLOAD_SIZE,
            DEFAULT_PING_INTERVAL,
            DEFAULT_PING_TIMEOUT,
            Vec::new(),
        )
    }

    /// Creates a relay with a custom frame size limit, heartbeat timing and
    /// origin allow-list.
    #[must_use]
    pub fn with_config(
        max_payload_size: usize,
        ping_interval: Duration,
        ping_timeout: Duration,
        allowed_origins: Vec<String>,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RoomRegistry::new(),
            max_payload_size,
            ping_interval,
            ping_timeout,
            allowed_origins,
        }
    }

    /// Registers a connection's outbound channel.
    pub async fn register(&self, conn: ConnectionId, sender: mpsc::UnboundedSender<Message>) {
        let mut conns = self.connections.write().await;
        conns.insert(conn, sender);
    }

    /// Removes a connection from the table.
    pub async fn unregister(&self, conn: ConnectionId) {
        let mut conns = self.connections.write().await;
        conns.remove(&conn);
    }

    /// Returns `true` if a socket may be opened from `origin`.
    ///
    /// Requests without an `Origin` header come from non-browser clients and
    /// are accepted; a browser origin must be on the allow-list.
    #[must_use]
    pub fn origin_allowed(&self, origin: Option<&HeaderValue>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        origin
            .to_str()
            .is_ok_and(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a WebSocket Close frame to every open connection.
    ///
    /// Each writer task forwards the frame, and the client's close reply ends
    /// the connection. Used on graceful shutdown.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn_id, sender) in conns.iter() {
            tracing::info!(conn_id = %conn_id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Adds `conn` to the requested room and announces it to every member,
    /// the newcomer included.
    ///
    /// Returns the number of notices delivered; a request without a room is
    /// ignored and delivers nothing.
    pub async fn join(&self, conn: ConnectionId, request: &RoomRequest) -> usize {
        let Some(membership) = request.validate() else {
            tracing::debug!(conn_id = %conn, "join_room without room ignored");
            return 0;
        };

        let view = self.rooms.join(conn, membership.room).await;
        let members = view.members();
        tracing::info!(
            conn_id = %conn,
            room = %membership.room,
            members = members.len(),
            "joined room"
        );

        let notice = OutboundEvent::JoinedRoom(SystemNotice::joined(membership.name));
        let delivered = self.fan_out(&members, &notice, membership.room).await;
        drop(view);
        delivered
    }

    /// Removes `conn` from the requested room and announces it to the
    /// members that remain. The leaving connection gets no notice.
    ///
    /// Returns the number of notices delivered; a request without a room is
    /// ignored and delivers nothing.
    pub async fn leave(&self, conn: ConnectionId, request: &RoomRequest) -> usize {
        let Some(membership) = request.validate() else {
            tracing::debug!(conn_id = %conn, "leave_room without room ignored");
            return 0;
        };

        let view = self.rooms.leave(conn, membership.room).await;
        let remaining = view.members();
        tracing::info!(
            conn_id = %conn,
            room = %membership.room,
            members = remaining.len(),
            "left room"
        );

        let notice = OutboundEvent::LeftRoom(SystemNotice::left(membership.name));
        let delivered = self.fan_out(&remaining, &notice, membership.room).await;
        drop(view);
        delivered
    }

    /// Broadcasts `payload` verbatim to every member of its room, the sender
    /// included. The sender does not have to be a member.
    ///
    /// Returns the number of deliveries; a payload without a room is ignored.
    pub async fn send(&self, conn: ConnectionId, payload: MessagePayload) -> usize {
        let Some(room) = payload.room().map(str::to_string) else {
            tracing::debug!(conn_id = %conn, "send_message without room ignored");
            return 0;
        };

        let view = self.rooms.view(&room).await;
        let members = view.members();
        tracing::debug!(conn_id = %conn, room = %room, "relaying message");

        let delivered = self
            .fan_out(&members, &OutboundEvent::Message(payload), &room)
            .await;
        drop(view);
        delivered
    }

    /// Drops a closed connection from every room and from the connection
    /// table. Nobody is notified.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let rooms = self.rooms.leave_all(conn).await;
        self.unregister(conn).await;
        tracing::info!(conn_id = %conn, rooms = rooms.len(), "connection closed");
    }

    /// Routes a decoded event to its handler.
    pub async fn dispatch(&self, conn: ConnectionId, event: InboundEvent) {
        match event {
            InboundEvent::JoinRoom(request) => {
                self.join(conn, &request).await;
            }
            InboundEvent::LeaveRoom(request) => {
                self.leave(conn, &request).await;
            }
            InboundEvent::SendMessage(payload) => {
                self.send(conn, payload).await;
            }
        }
    }

    /// Decodes one text frame and dispatches it. Oversized, malformed and
    /// unknown frames are logged and dropped.
    ///
    /// Sockets already refuse messages over the limit at the transport; the
    /// check here covers frames handed in by other callers.
    pub async fn handle_text(&self, conn: ConnectionId, text: &str) {
        if text.len() > self.max_payload_size {
            tracing::warn!(
                conn_id = %conn,
                size = text.len(),
                max = self.max_payload_size,
                "frame exceeds size limit, dropped"
            );
            return;
        }

        match codec::decode_inbound(text) {
            Ok(event) => self.dispatch(conn, event).await,
            Err(CodecError::UnknownEvent(name)) => {
                tracing::debug!(conn_id = %conn, event = %name, "unknown event ignored");
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn, error = %e, "failed to decode frame");
            }
        }
    }

    /// Encodes `event` once and queues it for each recipient. Closed
    /// channels are skipped.
    ///
    /// Callers hold the room's [`RoomView`](crate::rooms::RoomView) while
    /// this runs: the registry lock is always taken before the connection
    /// table.
    async fn fan_out(&self, recipients: &[ConnectionId], event: &OutboundEvent, room: &str) -> usize {
        let text = match codec::encode_outbound(event) {
            Ok(t) => Utf8Bytes::from(t),
            Err(e) => {
                tracing::error!(room = %room, error = %e, "failed to encode outbound event");
                return 0;
            }
        };

        let conns = self.connections.read().await;
        let mut delivered = 0;
        for conn in recipients {
            let Some(sender) = conns.get(conn) else {
                continue;
            };
            if sender.send(Message::Text(text.clone())).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(conn_id = %conn, room = %room, "recipient channel closed, skipped");
            }
        }
        drop(conns);

        tracing::debug!(room = %room, recipients = recipients.len(), delivered, "fan-out complete");
        delivered
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Assign a [`ConnectionId`] and register the outbound channel.
/// 2. Spawn a writer that drains the channel and pings on an interval.
/// 3. Read frames until close, error, or `ping_timeout` of silence.
/// 4. Remove the connection from all rooms and the connection table.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let conn_id = ConnectionId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.register(conn_id, tx).await;
    tracing::info!(conn_id = %conn_id, "connection opened");

    let ping_interval = state.ping_interval;
    let mut write_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            let msg = tokio::select! {
                next = rx.recv() => match next {
                    Some(msg) => msg,
                    None => break,
                },
                _ = ticker.tick() => Message::Ping(Bytes::new()),
            };
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn_id = %conn_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let ping_timeout = state.ping_timeout;
    let mut read_task = tokio::spawn(async move {
        loop {
            let Ok(next) = tokio::time::timeout(ping_timeout, ws_receiver.next()).await else {
                tracing::info!(conn_id = %conn_id, "no frames within ping timeout, closing");
                break;
            };
            let Some(Ok(msg)) = next else {
                break;
            };
            match msg {
                Message::Text(text) => {
                    reader_state.handle_text(conn_id, text.as_str()).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn_id = %conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Binary, ping and pong frames only count as liveness.
                }
            }
        }
    });

    // Wait for either task to finish, then stop the other before the
    // connection is removed, so no event is handled after the disconnect.
    let reader_finished = tokio::select! {
        _ = &mut read_task => true,
        _ = &mut write_task => false,
    };
    if reader_finished {
        cancel(write_task).await;
    } else {
        cancel(read_task).await;
    }

    state.disconnect(conn_id).await;
}

/// Aborts `task` and waits until it has stopped running.
async fn cancel(task: JoinHandle<()>) {
    task.abort();
    let _ = task.await;
}

/// axum handler that upgrades an HTTP request to a relay connection.
///
/// Upgrades from a browser origin outside the allow-list get `403`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let origin = headers.get(header::ORIGIN);
    if !state.origin_allowed(origin) {
        tracing::warn!(origin = ?origin, "socket upgrade from disallowed origin rejected");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.max_message_size(state.max_payload_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}
