//! Event types exchanged between chat clients and the relay.
//!
//! Inbound events mirror what the web client emits (`join_room`,
//! `leave_room`, `send_message`); outbound events are what the relay pushes
//! back to room members (`joinRoom`, `leftRoom`, `message`). Every field a
//! client supplies is optional at the type level: absent or empty values are
//! filtered by [`RoomRequest::validate`] and [`MessagePayload::room`] rather
//! than rejected during decoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Client asks to join a room.
pub const JOIN_ROOM: &str = "join_room";
/// Client asks to leave a room.
pub const LEAVE_ROOM: &str = "leave_room";
/// Client sends a chat message to a room.
pub const SEND_MESSAGE: &str = "send_message";

/// Sender name used on relay-generated notices.
pub const SYSTEM_SENDER: &str = "System";
/// Display name used when a client does not supply one.
pub const DEFAULT_DISPLAY_NAME: &str = "Guest";

/// Payload of `join_room` and `leave_room`.
///
/// Both fields must be strings or `null`. A non-string `name` such as `42`
/// fails decoding, so the whole request is dropped as malformed instead of
/// joining with the value printed as the name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRequest {
    /// Target room label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Display name of the caller, used only in the system notice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A [`RoomRequest`] whose room is known to be present and non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership<'a> {
    /// Room to join or leave.
    pub room: &'a str,
    /// Display name, defaulted to [`DEFAULT_DISPLAY_NAME`].
    pub name: &'a str,
}

impl RoomRequest {
    /// Creates a request for `room` with an optional display name.
    #[must_use]
    pub fn new(room: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            room: Some(room.into()),
            name: name.map(str::to_string),
        }
    }

    /// Returns the room and display name, or `None` when the room is missing
    /// or empty.
    #[must_use]
    pub fn validate(&self) -> Option<Membership<'_>> {
        let room = self.room.as_deref().filter(|r| !r.is_empty())?;
        Some(Membership {
            room,
            name: self.name.as_deref().unwrap_or(DEFAULT_DISPLAY_NAME),
        })
    }
}

/// Payload of `send_message`, forwarded to room members untouched.
///
/// Field order is preserved so the broadcast is identical to what the
/// sender wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessagePayload(pub Map<String, Value>);

impl MessagePayload {
    /// Returns the target room if `room` is a non-empty string.
    #[must_use]
    pub fn room(&self) -> Option<&str> {
        self.0
            .get("room")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
    }

    /// Returns the underlying JSON object.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for MessagePayload {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Relay-generated notice sent when someone joins or leaves a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    /// Always [`SYSTEM_SENDER`] for relay-generated notices.
    pub name: String,
    /// Human-readable text, e.g. `"Alice joined."`.
    pub message: String,
}

impl SystemNotice {
    /// Notice announcing that `name` joined.
    #[must_use]
    pub fn joined(name: &str) -> Self {
        Self {
            name: SYSTEM_SENDER.to_string(),
            message: format!("{name} joined."),
        }
    }

    /// Notice announcing that `name` left.
    #[must_use]
    pub fn left(name: &str) -> Self {
        Self {
            name: SYSTEM_SENDER.to_string(),
            message: format!("{name} left."),
        }
    }
}

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    /// Add the calling connection to a room.
    #[serde(rename = "join_room")]
    JoinRoom(RoomRequest),
    /// Remove the calling connection from a room.
    #[serde(rename = "leave_room")]
    LeaveRoom(RoomRequest),
    /// Broadcast a payload to every member of a room.
    #[serde(rename = "send_message")]
    SendMessage(MessagePayload),
}

/// Events the relay pushes to room members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    /// Someone joined; delivered to all members including the newcomer.
    #[serde(rename = "joinRoom")]
    JoinedRoom(SystemNotice),
    /// Someone left; delivered to the remaining members.
    #[serde(rename = "leftRoom")]
    LeftRoom(SystemNotice),
    /// A chat message, verbatim as the sender emitted it.
    #[serde(rename = "message")]
    Message(MessagePayload),
}
