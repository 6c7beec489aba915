//! Relay wire protocol.
//!
//! Every frame is a JSON object tagged by `type`. Shapes travel inside the
//! `message` field of a `chat` frame as a *string* holding `{"shape": ...}`,
//! so a shape is JSON-encoded twice on the wire.

use crate::shapes::{Shape, ShapeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while decoding relay frames or history records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid shape: {0}")]
    Shape(#[from] ShapeError),
}

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to a room. Sent once per connection, right after it opens.
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    /// Unsubscribe before an orderly close.
    LeaveRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    /// Broadcast a committed shape.
    Chat {
        #[serde(rename = "roomId")]
        room_id: String,
        /// String-encoded `{"shape": ...}`.
        message: String,
    },
}

impl ClientMessage {
    pub fn join(room_id: impl Into<String>) -> Self {
        ClientMessage::JoinRoom { room_id: room_id.into() }
    }

    pub fn leave(room_id: impl Into<String>) -> Self {
        ClientMessage::LeaveRoom { room_id: room_id.into() }
    }

    /// Build the `chat` frame that broadcasts `shape` to `room_id`.
    pub fn chat(room_id: impl Into<String>, shape: &Shape) -> Result<Self, ProtocolError> {
        Ok(ClientMessage::Chat {
            room_id: room_id.into(),
            message: encode_shape(shape)?,
        })
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// A shape broadcast by another peer.
    Chat {
        #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        message: String,
    },
    /// Relay-side error report.
    Error { message: String },
    /// Any other frame type.
    #[serde(other)]
    Unknown,
}

/// Inner payload of a `chat` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeEnvelope {
    pub shape: Shape,
}

/// Decoded meaning of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A remote shape to append.
    Shape { room_id: Option<String>, shape: Shape },
    /// The relay reported an error.
    RelayError { message: String },
    /// Anything the client does not act on.
    Ignored,
}

/// Encode a shape as the string carried in a `chat` frame's `message`.
pub fn encode_shape(shape: &Shape) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&ShapeEnvelope { shape: shape.clone() })?)
}

/// Decode the string form of `{"shape": ...}`.
///
/// Unknown tags, missing fields, non-finite numbers and strokes with fewer than
/// two points are rejected.
pub fn decode_shape(message: &str) -> Result<Shape, ProtocolError> {
    let envelope: ShapeEnvelope = serde_json::from_str(message)?;
    envelope.shape.validate()?;
    Ok(envelope.shape)
}

/// Parse one text frame from the relay.
pub fn parse_relay_message(text: &str) -> Result<Inbound, ProtocolError> {
    match serde_json::from_str::<RelayMessage>(text)? {
        RelayMessage::Chat { room_id, message } => {
            let shape = decode_shape(&message)?;
            Ok(Inbound::Shape { room_id, shape })
        }
        RelayMessage::Error { message } => Ok(Inbound::RelayError { message }),
        RelayMessage::Unknown => Ok(Inbound::Ignored),
    }
}
