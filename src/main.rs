//! Chat Socket Client
//!
//! Connects to a chat socket, optionally authenticates, and logs everything
//! the session sees until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Anonymous session on channel 1234
//! chat-socket --address wss://chat.example.com/socket --channel-id 1234
//!
//! # Several equivalent endpoints, authenticated as a user
//! chat-socket -a ws://a.example.com/socket -a ws://b.example.com/socket \
//!     --channel-id 1234 --user-id 56 --auth-key secret
//!
//! # Everything from a config file
//! chat-socket --config chat-socket.toml
//! ```
//!
//! Set `RUST_LOG=chat_socket=debug` to see every frame.

use chat_socket::{Config, Notification, SocketClient, WsConnector};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chat-socket")]
#[command(about = "Resilient chat socket client")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket endpoint (repeat for several equivalent endpoints)
    #[arg(short, long = "address", env = "CHAT_SOCKET_ADDRESSES", value_delimiter = ',')]
    addresses: Vec<String>,

    /// Channel to authenticate against
    #[arg(long, env = "CHAT_SOCKET_CHANNEL_ID")]
    channel_id: Option<u64>,

    /// User id (omit for an anonymous session)
    #[arg(long, env = "CHAT_SOCKET_USER_ID")]
    user_id: Option<u64>,

    /// Auth key for the user
    #[arg(long, env = "CHAT_SOCKET_AUTH_KEY", hide_env_values = true)]
    auth_key: Option<String>,

    /// Keepalive probe interval in milliseconds (0 disables)
    #[arg(long)]
    ping_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chat_socket=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if !args.addresses.is_empty() {
        config.addresses = args.addresses;
    }
    if args.channel_id.is_some() {
        config.channel_id = args.channel_id;
    }
    if args.user_id.is_some() {
        config.user_id = args.user_id;
    }
    if args.auth_key.is_some() {
        config.auth_key = args.auth_key;
    }
    if let Some(ms) = args.ping_interval_ms {
        config.socket.ping_interval_ms = ms;
    }

    info!(
        addresses = ?config.addresses,
        channel_id = ?config.channel_id,
        "Starting chat-socket"
    );

    let client = SocketClient::new(
        config.addresses.clone(),
        config.socket.clone(),
        WsConnector::new(),
    )?;
    let mut notifications = client.subscribe();
    client.boot();

    if let Some(channel_id) = config.channel_id {
        let auth_client = client.clone();
        let (user_id, auth_key) = (config.user_id, config.auth_key.clone());
        tokio::spawn(async move {
            match auth_client.auth(channel_id, user_id, auth_key).await {
                Ok(reply) => info!(channel_id, reply = %reply, "Authenticated"),
                Err(e) => error!(channel_id, error = %e, "Authentication failed"),
            }
        });
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing session");
                client.close();
                break;
            }
            notification = notifications.recv() => match notification {
                Ok(Notification::Closed) => {
                    info!("Session closed");
                    return Ok(());
                }
                Ok(notification) => log_notification(&notification),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification stream lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }

    // Wait for the transport to go away
    client.closed().await;

    info!("chat-socket stopped");
    Ok(())
}

fn log_notification(notification: &Notification) {
    match notification {
        Notification::Connected => info!("Connected"),
        Notification::Reconnecting { delay, attempt } => {
            warn!(delay_ms = delay.as_millis() as u64, attempt, "Reconnecting")
        }
        Notification::Error(e) => warn!(error = %e, "Session error"),
        Notification::Event { name, data } => info!(event = %name, data = %data, "Event"),
        Notification::AuthResult(result) => info!(ok = result.is_ok(), "Auth result"),
        other => tracing::debug!(kind = other.kind(), "Notification"),
    }
}
