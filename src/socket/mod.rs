//! Chat Socket Session
//!
//! A resilient client-side session for a JSON message socket: it keeps one
//! logical connection alive across transport failures, correlates replies to
//! calls, spools calls made while disconnected, and re-authenticates after
//! every reconnect.
//!
//! # Architecture
//!
//! The module is organized by concern, with each submodule having a single responsibility:
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `transport` | Duplex text socket and its generation-stamped events    |
//! | `protocol`  | JSON envelope wire format                               |
//! | `router`    | Classify inbound frames (reply, welcome, event, junk)   |
//! | `addresses` | Round-robin endpoint selection                          |
//! | `backoff`   | Reconnect delay policy                                  |
//! | `keepalive` | Probe cadence and response deadlines                    |
//! | `spool`     | FIFO of frames waiting for a connection                 |
//! | `calls`     | Pending call registry and reply correlation             |
//! | `auth`      | Saved credentials                                       |
//! | `session`   | The state machine actor that owns all of the above      |
//! | `client`    | Cloneable handle to the actor                           |
//!
//! # Key Design Principles
//!
//! ## 1. One Owner
//!
//! - All session state lives inside a single actor task
//! - Handles send commands and await oneshot replies
//! - Status is published on a `watch`, notifications on a `broadcast`
//!
//! ## 2. Stale Transports Are Inert
//!
//! - Every `boot()` starts a new generation
//! - Transport events carry their generation and are dropped if it is not current
//!
//! ## 3. Calls Survive Reconnects
//!
//! - Calls made while disconnected are spooled and flushed in order
//! - Pending replies stay registered until they arrive, time out, or the session closes

pub mod addresses;
pub mod auth;
pub mod backoff;
pub mod calls;
pub mod client;
pub mod events;
pub mod keepalive;
pub mod protocol;
pub mod router;
pub mod session;
pub mod spool;
pub mod transport;

pub use auth::AuthCredentials;
pub use client::SocketClient;
pub use events::{Notification, Status};
pub use protocol::Envelope;
pub use session::CallOptions;
pub use transport::{Connector, EventSink, Frame, Transport, TransportEvent, WsConnector};

use std::time::Duration;
use tokio::time::Instant;

/// Longest span any session deadline is armed for (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after` without overflowing; absurd spans become "far future".
pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now + after.min(FAR_FUTURE)
}
