//! Server configuration.

use std::time::Duration;

use ble2ws_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the bridge server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent `WebSocket` connections.
    pub max_connections: usize,
    /// Interval between Ping frames and liveness checks, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a client after this long without a Pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Max inbound `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Per-client outbound queue capacity.
    pub send_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 64,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 1024,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            heartbeat_interval_ms: settings.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.heartbeat_timeout_ms,
            max_message_size: settings.max_message_size,
            send_queue_capacity: settings.send_queue_capacity,
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_zero() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn heartbeat_durations() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn from_settings_keeps_every_field() {
        let settings = ServerSettings {
            host: "0.0.0.0".into(),
            port: 9000,
            max_connections: 3,
            send_queue_capacity: 8,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9000");
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.send_queue_capacity, 8);
        assert_eq!(cfg.max_message_size, settings.max_message_size);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
