//! Wire messages for the Berkeley synchronization protocol.
//!
//! Every message is a single JSON object terminated by `\n`. The first line a
//! node sends is a bare [`Registration`]; every later line in either direction
//! is a [`Message`] tagged by its `type` field.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Line terminator used by the framing layer.
pub const LINE_DELIMITER: u8 = b'\n';

/// Errors produced while encoding or decoding protocol lines.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Expected a registration but received a typed message ({0})")]
    UnexpectedType(String),
}

/// First message on a connection, binding it to a node identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, rename = "type", skip_serializing)]
    kind: Option<String>,
}

impl Registration {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: Some(id.into()),
            kind: None,
        }
    }

    /// Identifier to register under, falling back to `fallback` (usually the
    /// peer address) when the node did not name itself.
    pub fn resolve_id(&self, fallback: &str) -> String {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

/// Typed protocol messages exchanged after registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Coordinator asks a node for its time; `t0` is the coordinator's send time.
    TimeRequest { t0: f64 },

    /// Node reports its local time `t1` at receipt. `t0` echoes the request.
    TimeReply {
        t1: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        t0: Option<f64>,
    },

    /// Seconds the node should add to its logical clock.
    Adjust {
        #[serde(default)]
        offset: f64,
    },
}

impl Message {
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::TimeRequest { .. } => "TIME_REQUEST",
            Message::TimeReply { .. } => "TIME_REPLY",
            Message::Adjust { .. } => "ADJUST",
        }
    }
}

/// Serialize `value` as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, MessageError> {
    let mut line = serde_json::to_vec(value)?;
    line.push(LINE_DELIMITER);
    Ok(line)
}

/// Parse a single line (without its terminator) as a typed message.
pub fn decode_message(line: &[u8]) -> Result<Message, MessageError> {
    Ok(serde_json::from_slice(line)?)
}

/// Parse a single line as a registration. Typed messages are rejected so a
/// stray `TIME_REPLY` is never mistaken for an anonymous node.
pub fn decode_registration(line: &[u8]) -> Result<Registration, MessageError> {
    let registration: Registration = serde_json::from_slice(line)?;
    if let Some(kind) = &registration.kind {
        return Err(MessageError::UnexpectedType(kind.clone()));
    }
    Ok(registration)
}
