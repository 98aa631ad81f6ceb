//! Error types for chat-socket

use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong on a session.
///
/// Cloneable so the same fault can be handed to a caller and broadcast as a
/// [`Notification::Error`](crate::Notification::Error).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SocketError {
    #[error("Timeout: {method} got no response within {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Bad message: {0}")]
    BadMessage(String),

    #[error("No handler for reply with id {0}")]
    NoHandlerForReply(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered the call with an error payload.
    #[error("Server replied with error: {0}")]
    Reply(serde_json::Value),

    #[error("Not connected")]
    NotConnected,

    #[error("Session closed")]
    Closed,

    #[error("Spool full ({0} messages queued)")]
    SpoolFull(usize),

    #[error("Gave up after {attempts} reconnection attempts")]
    GaveUp { attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SocketError {
    pub(crate) fn timeout(method: impl Into<String>, after: Duration) -> Self {
        SocketError::Timeout {
            method: method.into(),
            after,
        }
    }
}

pub type Result<T> = std::result::Result<T, SocketError>;
