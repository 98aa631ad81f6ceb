//! Transport Layer
//!
//! Single responsibility: open a duplex text socket, push frames through it,
//! and report what happens to it. No knowledge of envelopes, calls, or
//! reconnection.
//!
//! The session consumes transports through two small traits:
//!
//! - [`Connector`] opens a transport to an address and returns its handle
//!   immediately. The actual connection happens in the background.
//! - [`Transport`] is that handle: `send`, `close`, and optionally a native
//!   `ping`.
//!
//! Everything the transport observes (open, frames, pong, close, error) is
//! reported through the [`EventSink`] it was opened with. The sink stamps each
//! event with the generation of the connection attempt, which lets the session
//! ignore anything coming from a transport it has already replaced.
//!
//! [`WsConnector`] is the production implementation on top of tokio-tungstenite.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, warn};

use crate::error::SocketError;

/// A frame received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(Frame),
    Pong,
    Close,
    Error(String),
}

/// Where a transport reports its events.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Silently dropped once the session is gone.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send((self.generation, event));
    }
}

/// Handle to one open (or opening) transport.
pub trait Transport: Send {
    /// Queue a text frame. Fails only if the transport can no longer send.
    fn send(&mut self, text: String) -> Result<(), SocketError>;

    /// Ask the transport to close. It reports [`TransportEvent::Close`] when done.
    fn close(&mut self);

    /// Whether [`Transport::ping`] is backed by a protocol-level ping.
    fn supports_ping(&self) -> bool {
        false
    }

    /// Send a protocol-level ping; the answer arrives as [`TransportEvent::Pong`].
    fn ping(&mut self) -> Result<(), SocketError> {
        Err(SocketError::Transport("Native ping not supported".into()))
    }
}

/// Opens transports to addresses.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, address: &str, events: EventSink) -> Result<Box<dyn Transport>, SocketError>;
}

/// Opens WebSocket transports.
///
/// `wss://` endpoints need the `native-tls` feature.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, address: &str, events: EventSink) -> Result<Box<dyn Transport>, SocketError> {
        if !(address.starts_with("ws://") || address.starts_with("wss://")) {
            return Err(SocketError::Config(format!(
                "Not a WebSocket address: {}",
                address
            )));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(address.to_string(), outbound_rx, events));
        Ok(Box::new(WsTransport { outbound: outbound_tx }))
    }
}

enum Outbound {
    Text(String),
    Ping,
    Close,
}

struct WsTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Transport for WsTransport {
    fn send(&mut self, text: String) -> Result<(), SocketError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| SocketError::Transport("Socket task has exited".into()))
    }

    fn close(&mut self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    fn supports_ping(&self) -> bool {
        true
    }

    fn ping(&mut self) -> Result<(), SocketError> {
        self.outbound
            .send(Outbound::Ping)
            .map_err(|_| SocketError::Transport("Socket task has exited".into()))
    }
}

/// Socket task - owns the WebSocket for one connection attempt.
///
/// Always ends by reporting `Close`, whatever the reason.
async fn run_socket(
    address: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: EventSink,
) {
    let generation = events.generation();
    debug!(address = %address, generation, "Connecting to WebSocket");

    let ws = match connect_async(address.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            events.emit(TransportEvent::Error(format!("WebSocket connect failed: {}", e)));
            events.emit(TransportEvent::Close);
            return;
        }
    };

    debug!(address = %address, generation, "WebSocket connected");
    events.emit(TransportEvent::Open);

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        events.emit(TransportEvent::Error(format!("Failed to send: {}", e)));
                        break;
                    }
                }
                Some(Outbound::Ping) => {
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        events.emit(TransportEvent::Error(format!("Failed to ping: {}", e)));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Message(Frame::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    events.emit(TransportEvent::Message(Frame::Binary(data)));
                }
                Some(Ok(Message::Pong(_))) => events.emit(TransportEvent::Pong),
                Some(Ok(Message::Close(frame))) => {
                    debug!(generation, frame = ?frame, "Server closed connection");
                    break;
                }
                Some(Ok(_)) => {
                    // Ping replies are queued by tungstenite and flushed on the next write
                }
                Some(Err(e)) => {
                    warn!(generation, error = %e, "WebSocket error");
                    events.emit(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    events.emit(TransportEvent::Close);
    debug!(address = %address, generation, "Socket task ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_stamps_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);
        sink.emit(TransportEvent::Open);
        sink.clone().emit(TransportEvent::Pong);
        assert_eq!(rx.recv().await, Some((7, TransportEvent::Open)));
        assert_eq!(rx.recv().await, Some((7, TransportEvent::Pong)));
    }

    #[tokio::test]
    async fn test_ws_connector_rejects_non_websocket_address() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = WsConnector::new().open("http://example.com", EventSink::new(1, tx));
        assert!(matches!(result, Err(SocketError::Config(_))));
    }

    #[tokio::test]
    async fn test_ws_connector_reports_failed_connect() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Port 1 on loopback is never listening
        let _transport = WsConnector::new()
            .open("ws://127.0.0.1:1", EventSink::new(3, tx))
            .unwrap();

        match rx.recv().await {
            Some((3, TransportEvent::Error(_))) => {}
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(rx.recv().await, Some((3, TransportEvent::Close)));
    }
}
