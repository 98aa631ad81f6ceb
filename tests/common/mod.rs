//! Scripted in-memory transport for driving a session from tests.

#![allow(dead_code)]

use chat_socket::{
    Connector, EventSink, Frame, Notification, SocketClient, SocketConfig, SocketError, Status,
    Transport, TransportEvent,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Hands every transport the session opens to the test.
pub struct MockConnector {
    links: mpsc::UnboundedSender<MockLink>,
    native_ping: bool,
    refuse: Arc<AtomicBool>,
}

impl Connector for MockConnector {
    fn open(&self, address: &str, events: EventSink) -> Result<Box<dyn Transport>, SocketError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SocketError::Transport(format!("refused: {}", address)));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (ping_tx, ping_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let _ = self.links.send(MockLink {
            address: address.to_string(),
            events: events.clone(),
            sent: sent_rx,
            pings: ping_rx,
            closed: closed.clone(),
        });

        Ok(Box::new(MockTransport {
            events,
            sent: sent_tx,
            pings: ping_tx,
            closed,
            native_ping: self.native_ping,
        }))
    }
}

struct MockTransport {
    events: EventSink,
    sent: mpsc::UnboundedSender<String>,
    pings: mpsc::UnboundedSender<()>,
    closed: Arc<AtomicBool>,
    native_ping: bool,
}

impl Transport for MockTransport {
    fn send(&mut self, text: String) -> Result<(), SocketError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SocketError::Transport("closed".into()));
        }
        let _ = self.sent.send(text);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events.emit(TransportEvent::Close);
        }
    }

    fn supports_ping(&self) -> bool {
        self.native_ping
    }

    fn ping(&mut self) -> Result<(), SocketError> {
        let _ = self.pings.send(());
        Ok(())
    }
}

/// The test's side of one transport.
pub struct MockLink {
    pub address: String,
    events: EventSink,
    sent: mpsc::UnboundedReceiver<String>,
    pings: mpsc::UnboundedReceiver<()>,
    closed: Arc<AtomicBool>,
}

impl MockLink {
    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    pub fn open(&self) {
        self.events.emit(TransportEvent::Open);
    }

    pub fn welcome(&self) {
        self.text(json!({"type": "event", "event": "WelcomeEvent", "data": {"server": "mock"}}));
    }

    pub fn reply(&self, id: u64, data: Value) {
        self.text(json!({"type": "reply", "id": id, "error": null, "data": data}));
    }

    pub fn reply_error(&self, id: u64, error: Value) {
        self.text(json!({"type": "reply", "id": id, "error": error, "data": null}));
    }

    pub fn event(&self, name: &str, data: Value) {
        self.text(json!({"type": "event", "event": name, "data": data}));
    }

    pub fn text(&self, value: Value) {
        self.raw(&value.to_string());
    }

    pub fn raw(&self, text: &str) {
        self.events
            .emit(TransportEvent::Message(Frame::Text(text.to_string())));
    }

    pub fn pong(&self) {
        self.events.emit(TransportEvent::Pong);
    }

    /// The connection breaks underneath the session.
    pub fn fail(&self) {
        self.events
            .emit(TransportEvent::Error("connection reset".into()));
    }

    /// The server hangs up.
    pub fn hang_up(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events.emit(TransportEvent::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next frame the session sent, decoded.
    pub async fn next_sent(&mut self) -> Value {
        let text = self.sent.recv().await.expect("transport dropped");
        serde_json::from_str(&text).expect("session sent invalid JSON")
    }

    /// Frames already sent and not yet read.
    pub fn drain_sent(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            frames.push(serde_json::from_str(&text).expect("session sent invalid JSON"));
        }
        frames
    }

    pub async fn next_ping(&mut self) {
        self.pings.recv().await.expect("transport dropped");
    }
}

pub struct Harness {
    pub client: SocketClient,
    pub links: mpsc::UnboundedReceiver<MockLink>,
    pub notifications: broadcast::Receiver<Notification>,
    refuse: Arc<AtomicBool>,
}

impl Harness {
    pub fn new(addresses: &[&str], config: SocketConfig) -> Self {
        Self::build(addresses, config, false)
    }

    pub fn with_native_ping(addresses: &[&str], config: SocketConfig) -> Self {
        Self::build(addresses, config, true)
    }

    fn build(addresses: &[&str], config: SocketConfig, native_ping: bool) -> Self {
        let (links_tx, links) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicBool::new(false));
        let connector = MockConnector {
            links: links_tx,
            native_ping,
            refuse: refuse.clone(),
        };
        let client = SocketClient::new(
            addresses.iter().map(|a| a.to_string()).collect(),
            config,
            connector,
        )
        .expect("valid addresses");
        let notifications = client.subscribe();
        Self {
            client,
            links,
            notifications,
            refuse,
        }
    }

    /// Make every subsequent `open` fail.
    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub async fn next_link(&mut self) -> MockLink {
        self.links.recv().await.expect("session dropped")
    }

    /// Boot and walk the session through open + welcome.
    pub async fn connect(&mut self) -> MockLink {
        self.client.boot();
        self.establish().await
    }

    /// Open and welcome the next transport the session creates.
    pub async fn establish(&mut self) -> MockLink {
        let link = self.next_link().await;
        link.open();
        link.welcome();
        self.wait_for(|n| *n == Notification::Connected).await;
        link
    }

    /// Skip notifications until one matches.
    pub async fn wait_for<F>(&mut self, mut matches: F) -> Notification
    where
        F: FnMut(&Notification) -> bool,
    {
        let wait = async {
            loop {
                match self.notifications.recv().await {
                    Ok(n) if matches(&n) => return n,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("notifications closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(600), wait)
            .await
            .expect("notification never arrived")
    }

    /// Notifications emitted so far and not yet read.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut seen = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            seen.push(n);
        }
        seen
    }

    pub async fn wait_status(&self, status: Status) {
        let mut watch = self.client.watch_status();
        tokio::time::timeout(Duration::from_secs(600), watch.wait_for(|s| *s == status))
            .await
            .expect("status never reached")
            .expect("session dropped");
    }
}

/// Let the session actor catch up with everything queued so far.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub fn test_config() -> SocketConfig {
    SocketConfig {
        // Periodic probes only where a test asks for them
        ping_interval_ms: 0,
        ..Default::default()
    }
}
