//! Event and connection-state types for the bus

use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed server-push event: `{ "type": topic, "data": payload }`
///
/// Topics are dot-separated (`job.started`) and opaque to the bus; the
/// payload is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEvent {
    #[serde(rename = "type")]
    pub topic: String,

    #[serde(rename = "data", default)]
    pub payload: serde_json::Value,
}

impl NamedEvent {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Lifecycle of the live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}

/// Why the bus ended up disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// `disconnect()` or teardown
    Requested,
    /// The server kept refusing our credentials; no further retries
    AuthRejected,
}

/// State plus the reason for the last disconnect, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reason: Option<DisconnectReason>,
}

impl ConnectionStatus {
    pub fn new(state: ConnectionState) -> Self {
        Self { state, reason: None }
    }

    pub fn disconnected(reason: DisconnectReason) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reason: Some(reason),
        }
    }

    /// Disconnected for good: only an explicit `connect()` starts again
    pub fn is_terminal(&self) -> bool {
        self.state == ConnectionState::Disconnected && self.reason == Some(DisconnectReason::AuthRejected)
    }
}
