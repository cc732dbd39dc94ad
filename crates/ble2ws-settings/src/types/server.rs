//! Listener settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP / WebSocket listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Concurrent WebSocket clients; further upgrades get HTTP 503.
    pub max_connections: usize,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a client after this long without a pong.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Outbound queue length per client.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            max_connections: 64,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 1024,
        }
    }
}

impl ServerSettings {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong deadline.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}
