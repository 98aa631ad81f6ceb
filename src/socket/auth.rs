//! Session Authentication
//!
//! Single responsibility: hold the credentials a session authenticates with and
//! render them as `auth` call arguments.
//!
//! # Authentication Flow
//!
//! 1. The caller invokes `SocketClient::auth()`. The credentials are saved on
//!    the session before anything is sent.
//! 2. If the session is connected, the `auth` call goes out immediately.
//!    Otherwise the caller waits for the next re-authentication.
//! 3. After every reconnect the session re-sends the saved credentials
//!    *before* flushing the spool, bypassing the spool itself.
//! 4. If that re-authentication is rejected, the session closes instead of
//!    carrying on unauthenticated.

use serde_json::{json, Value};

/// Credentials for the `auth` method.
///
/// Without a user id and key the session authenticates anonymously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCredentials {
    pub channel_id: u64,
    pub user_id: Option<u64>,
    pub auth_key: Option<String>,
}

impl AuthCredentials {
    pub fn anonymous(channel_id: u64) -> Self {
        Self {
            channel_id,
            user_id: None,
            auth_key: None,
        }
    }

    pub fn user(channel_id: u64, user_id: u64, auth_key: impl Into<String>) -> Self {
        Self {
            channel_id,
            user_id: Some(user_id),
            auth_key: Some(auth_key.into()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none() && self.auth_key.is_none()
    }

    /// Arguments for the `auth` method call.
    pub fn arguments(&self) -> Vec<Value> {
        if self.is_anonymous() {
            vec![json!(self.channel_id)]
        } else {
            vec![
                json!(self.channel_id),
                json!(self.user_id),
                json!(self.auth_key),
            ]
        }
    }
}
