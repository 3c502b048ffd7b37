//! JSON framing for relay events.
//!
//! Every WebSocket text frame carries one envelope of the form
//! `{"event": <name>, "data": <payload>}`. A missing `data` is read as
//! `null`.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::event::{InboundEvent, JOIN_ROOM, LEAVE_ROOM, OutboundEvent, SEND_MESSAGE};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON, lacks an event name, or its payload
    /// does not fit the event's shape.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The frame names an event the relay does not handle.
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Raw envelope before the payload is interpreted.
#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decodes a client frame into an [`InboundEvent`].
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for invalid JSON or a payload of the
/// wrong shape, and [`CodecError::UnknownEvent`] for unrecognised event
/// names.
pub fn decode_inbound(text: &str) -> Result<InboundEvent, CodecError> {
    let frame: Frame =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    match frame.event.as_str() {
        JOIN_ROOM => Ok(InboundEvent::JoinRoom(payload(&frame.event, frame.data)?)),
        LEAVE_ROOM => Ok(InboundEvent::LeaveRoom(payload(&frame.event, frame.data)?)),
        SEND_MESSAGE => Ok(InboundEvent::SendMessage(payload(&frame.event, frame.data)?)),
        _ => Err(CodecError::UnknownEvent(frame.event)),
    }
}

/// Encodes an [`InboundEvent`] as a client would send it.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_inbound(event: &InboundEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes an [`OutboundEvent`] for delivery to room members.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_outbound(event: &OutboundEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a relay frame into an [`OutboundEvent`].
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the frame is not a known outbound
/// event.
pub fn decode_outbound(text: &str) -> Result<OutboundEvent, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, CodecError> {
    serde_json::from_value(data).map_err(|e| CodecError::Malformed(format!("{event}: {e}")))
}
