//! Socket Client
//!
//! High-level handle to a session. Cheap to clone; every clone talks to the
//! same session actor. The actor shuts down once the last handle is dropped.
//!
//! # Usage
//!
//! ```ignore
//! use chat_socket::{CallOptions, SocketClient, SocketConfig, WsConnector};
//!
//! let client = SocketClient::new(
//!     vec!["wss://chat.example.com/socket".to_string()],
//!     SocketConfig::default(),
//!     WsConnector::new(),
//! )?;
//! client.boot();
//! client.auth(1234, None, None).await?;
//!
//! let reply = client
//!     .call("msg", vec!["hello".into()], CallOptions::default())
//!     .await?;
//! ```

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::addresses::AddressPool;
use super::auth::AuthCredentials;
use super::events::{Notification, Status};
use super::session::{CallOptions, Command, SessionActor};
use super::transport::Connector;
use crate::config::SocketConfig;
use crate::error::{Result, SocketError};

#[derive(Clone)]
pub struct SocketClient {
    commands: mpsc::UnboundedSender<Command>,
    notifications: broadcast::Sender<Notification>,
    status: watch::Receiver<Status>,
}

impl SocketClient {
    /// Create a session over `addresses` and spawn its actor.
    ///
    /// Nothing connects until [`SocketClient::boot`]. Must be called from
    /// within a tokio runtime.
    pub fn new<C: Connector>(
        addresses: Vec<String>,
        config: SocketConfig,
        connector: C,
    ) -> Result<Self> {
        config.validate()?;
        let addresses = AddressPool::new(addresses)?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(Status::Idle);

        let actor = SessionActor::new(
            config,
            connector,
            addresses,
            commands_rx,
            notifications.clone(),
            status_tx,
        );
        tokio::spawn(actor.run());

        Ok(Self {
            commands: commands_tx,
            notifications,
            status: status_rx,
        })
    }

    /// Connect to the next address, replacing any current connection.
    pub fn boot(&self) {
        self.send(Command::Boot);
    }

    /// Close the session. No reconnects happen afterwards until `boot()`.
    pub fn close(&self) {
        self.send(Command::Close);
    }

    /// Invoke `method` on the server.
    ///
    /// While the session is not connected the call is spooled and sent after
    /// the next successful (re)connect, unless `options.force` is set.
    pub async fn call(
        &self,
        method: impl Into<String>,
        arguments: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Call {
            method: method.into(),
            arguments,
            options,
            reply,
        });
        rx.await.unwrap_or(Err(SocketError::Closed))
    }

    /// Authenticate with a channel, optionally as a user.
    ///
    /// The credentials are remembered and re-sent after every reconnect.
    /// If the session is not connected yet, this resolves with the outcome of
    /// the next re-authentication.
    pub async fn auth(
        &self,
        channel_id: u64,
        user_id: Option<u64>,
        auth_key: Option<String>,
    ) -> Result<Value> {
        self.auth_with(AuthCredentials {
            channel_id,
            user_id,
            auth_key,
        })
        .await
    }

    pub async fn auth_with(&self, credentials: AuthCredentials) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Auth { credentials, reply });
        rx.await.unwrap_or(Err(SocketError::Closed))
    }

    /// Probe the connection. Fails with `NotConnected` unless connected.
    pub async fn ping(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Ping { reply });
        rx.await.unwrap_or(Err(SocketError::Closed))
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == Status::Connected
    }

    /// Resolve once the session reaches `Closed`.
    ///
    /// Driven by the status watch, so a slow notification subscriber cannot
    /// make it miss the transition.
    pub async fn closed(&self) {
        let mut status = self.status.clone();
        // An error here means the actor is gone, which is closed too
        let _ = status.wait_for(|s| *s == Status::Closed).await;
    }

    /// Watch status transitions.
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    /// Receive every notification emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    fn send(&self, cmd: Command) {
        // The actor outlives every handle, so this only fails during runtime shutdown
        let _ = self.commands.send(cmd);
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("status", &self.status())
            .finish()
    }
}
