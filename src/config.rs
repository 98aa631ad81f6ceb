//! Configuration for chat-socket

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::SocketError;

/// Session tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Keepalive probe cadence in milliseconds
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Probe response deadline, also used for connection establishment
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// Default per-call deadline in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Consecutive failed attempts before giving up (None = unlimited)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// Maximum messages parked while disconnected (None = unbounded)
    #[serde(default)]
    pub max_spool_size: Option<usize>,

    /// Notification broadcast channel capacity
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_ping_interval_ms() -> u64 {
    15_000
}

fn default_ping_timeout_ms() -> u64 {
    5_000
}

fn default_call_timeout_ms() -> u64 {
    20_000
}

fn default_notification_capacity() -> usize {
    256
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            max_reconnect_attempts: None,
            max_spool_size: None,
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl SocketConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Reject settings the session cannot run with.
    ///
    /// A zero `ping_timeout_ms` would expire every connection attempt at once,
    /// and a zero `call_timeout_ms` every call.
    pub fn validate(&self) -> Result<(), SocketError> {
        if self.ping_timeout_ms == 0 {
            return Err(SocketError::Config("ping_timeout_ms must be greater than 0".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(SocketError::Config("call_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Configuration for the command-line client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Equivalent socket endpoints, tried round-robin
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Channel to authenticate against after connecting
    #[serde(default)]
    pub channel_id: Option<u64>,

    /// User id for authenticated (non-anonymous) sessions
    #[serde(default)]
    pub user_id: Option<u64>,

    /// Auth key issued for the channel
    #[serde(default)]
    pub auth_key: Option<String>,

    #[serde(default)]
    pub socket: SocketConfig,
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
