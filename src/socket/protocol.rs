//! Chat Socket Wire Protocol
//!
//! Single responsibility: Encode and decode the JSON envelopes exchanged over the socket.
//!
//! # Wire Format
//!
//! Every frame is one JSON object tagged by `type`.
//!
//! ## Method (outgoing call)
//! ```text
//! { "type": "method", "id": <u64>, "method": <string>, "arguments": [ ... ] }
//! ```
//!
//! ## Reply (correlated response)
//! ```text
//! { "type": "reply", "id": <u64>, "error": <string|object|null>, "data": <any> }
//! ```
//!
//! ## Event (server push)
//! ```text
//! { "type": "event", "event": <string>, "data": <any> }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SocketError;

/// Name of the server event that acknowledges a fresh connection.
pub const WELCOME_EVENT: &str = "WelcomeEvent";

/// Method used by the fallback keepalive probe.
pub const PING_METHOD: &str = "ping";

/// Method used to authenticate the session.
pub const AUTH_METHOD: &str = "auth";

/// One wire-level frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Method {
        id: u64,
        method: String,
        #[serde(default)]
        arguments: Vec<Value>,
    },
    Reply {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

impl Envelope {
    /// Build an outgoing call frame.
    pub fn method(id: u64, method: impl Into<String>, arguments: Vec<Value>) -> Self {
        Envelope::Method {
            id,
            method: method.into(),
            arguments,
        }
    }

    /// The reply outcome: the server's error payload wins over any data.
    ///
    /// Returns None for non-reply envelopes.
    pub fn reply_outcome(&self) -> Option<(u64, Result<Value, SocketError>)> {
        match self {
            Envelope::Reply { id, error, data } => {
                let outcome = match error {
                    Some(err) if !err.is_null() => Err(SocketError::Reply(err.clone())),
                    _ => Ok(data.clone().unwrap_or(Value::Null)),
                };
                Some((*id, outcome))
            }
            _ => None,
        }
    }
}

/// Serialize an envelope into a text frame.
pub fn encode(envelope: &Envelope) -> Result<String, SocketError> {
    serde_json::to_string(envelope)
        .map_err(|e| SocketError::BadMessage(format!("Failed to encode envelope: {}", e)))
}

/// Parse a text frame into an envelope.
pub fn decode(text: &str) -> Result<Envelope, SocketError> {
    serde_json::from_str(text).map_err(|e| SocketError::BadMessage(format!("{}: {}", e, text)))
}
