//! Packet Router
//!
//! Turns a raw inbound frame into something the session can act on. Decoding
//! never fails the session: anything unusable comes back as
//! [`Inbound::Malformed`] to be reported and dropped.

use serde_json::Value;

use super::protocol::{decode, Envelope, WELCOME_EVENT};
use super::transport::Frame;
use crate::error::SocketError;

#[derive(Debug)]
pub enum Inbound {
    /// Correlated response for call `id`
    Reply {
        envelope: Envelope,
        id: u64,
        outcome: Result<Value, SocketError>,
    },
    /// The server acknowledged the connection
    Welcome { envelope: Envelope, data: Value },
    /// Any other server push
    Event {
        envelope: Envelope,
        name: String,
        data: Value,
    },
    Malformed(SocketError),
}

pub fn route(frame: Frame) -> Inbound {
    let text = match frame {
        Frame::Text(text) => text,
        Frame::Binary(bytes) => {
            return Inbound::Malformed(SocketError::BadMessage(format!(
                "Unexpected binary frame ({} bytes)",
                bytes.len()
            )))
        }
    };

    let envelope = match decode(&text) {
        Ok(envelope) => envelope,
        Err(e) => return Inbound::Malformed(e),
    };

    match envelope {
        Envelope::Reply { .. } => {
            // reply_outcome is always Some for a reply
            let (id, outcome) = match envelope.reply_outcome() {
                Some(pair) => pair,
                None => return Inbound::Malformed(SocketError::BadMessage(text)),
            };
            Inbound::Reply {
                envelope,
                id,
                outcome,
            }
        }
        Envelope::Event { ref event, ref data } if event == WELCOME_EVENT => {
            let data = data.clone();
            Inbound::Welcome { envelope, data }
        }
        Envelope::Event { ref event, ref data } => {
            let (name, data) = (event.clone(), data.clone());
            Inbound::Event {
                envelope,
                name,
                data,
            }
        }
        Envelope::Method { ref method, .. } => Inbound::Malformed(SocketError::BadMessage(
            format!("Server sent a method envelope ({})", method),
        )),
    }
}
