//! Chat Socket - resilient client session for a JSON chat socket
//!
//! Connects to one of several socket endpoints, waits for the server's
//! `WelcomeEvent`, and keeps the session alive from then on:
//!
//! - lost connections are retried with jittered exponential backoff, rotating
//!   through the configured endpoints
//! - idle connections are probed and dropped if the probe goes unanswered
//! - calls made while disconnected are spooled and sent after reconnecting
//! - saved credentials are re-sent before anything else on every reconnect
//!
//! ## Wire Format
//!
//! ```text
//! → {"type":"method","id":3,"method":"auth","arguments":[1234,56,"key"]}
//! ← {"type":"reply","id":3,"error":null,"data":{"authenticated":true}}
//! ← {"type":"event","event":"ChatMessage","data":{...}}
//! ```

pub mod config;
pub mod error;
pub mod socket;

pub use config::{Config, SocketConfig};
pub use error::{Result, SocketError};
pub use socket::{
    AuthCredentials, CallOptions, Connector, Envelope, EventSink, Frame, Notification,
    SocketClient, Status, Transport, TransportEvent, WsConnector,
};
