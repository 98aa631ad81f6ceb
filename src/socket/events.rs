//! Session status and the notifications broadcast to subscribers.

use serde_json::Value;
use std::fmt;
use std::time::Duration;

use super::protocol::Envelope;
use crate::error::SocketError;

/// Lifecycle status of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Never booted
    Idle,
    /// Opening a transport, awaiting welcome, authenticating, or waiting to retry
    Connecting,
    /// Welcomed, authenticated and spool flushed
    Connected,
    /// User asked to close; waiting for the transport to go away
    Closing,
    /// Terminal until the next `boot()`
    Closed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Idle => "idle",
            Status::Connecting => "connecting",
            Status::Connected => "connected",
            Status::Closing => "closing",
            Status::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Everything a subscriber can observe about a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Connected,
    /// The transport went away; the next attempt starts after `delay`.
    Reconnecting { delay: Duration, attempt: u32 },
    Closed,
    Error(SocketError),
    /// Every decoded inbound envelope, before routing
    Packet(Envelope),
    /// A frame handed to the transport
    Sent(String),
    /// A frame parked until the session is re-established
    Spooled(String),
    /// Outcome of the re-authentication run after a reconnect
    AuthResult(Result<Value, SocketError>),
    /// A server-pushed event, re-emitted under its own name
    Event { name: String, data: Value },
}

impl Notification {
    /// Short name, handy for logging.
    pub fn kind(&self) -> &str {
        match self {
            Notification::Connected => "connected",
            Notification::Reconnecting { .. } => "reconnecting",
            Notification::Closed => "closed",
            Notification::Error(_) => "error",
            Notification::Packet(_) => "packet",
            Notification::Sent(_) => "sent",
            Notification::Spooled(_) => "spooled",
            Notification::AuthResult(_) => "authresult",
            Notification::Event { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_uses_event_name() {
        let n = Notification::Event {
            name: "ChatMessage".to_string(),
            data: Value::Null,
        };
        assert_eq!(n.kind(), "ChatMessage");
        assert_eq!(Notification::AuthResult(Ok(Value::Null)).kind(), "authresult");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Connecting.to_string(), "connecting");
        assert_eq!(Status::Closed.to_string(), "closed");
    }
}
