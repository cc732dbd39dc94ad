//! Settings type definitions.
//!
//! Every section uses `#[serde(rename_all = "camelCase", default)]` so a user
//! file may set any subset of keys; missing fields keep their defaults.

mod bridge;
mod logging;
mod server;

pub use bridge::*;
pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the bridge process.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "bridge": { "requestTimeoutMs": 30000 },
///   "logging": { "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Listener and per-connection limits.
    pub server: ServerSettings,
    /// Timeouts and cache policy of the protocol bridge.
    pub bridge: BridgeSettings,
    /// Log filter and output format.
    pub logging: LoggingSettings,
}

impl Settings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be at least 1".into(),
            ));
        }
        if server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if server.heartbeat_timeout_ms <= server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutMs ({}) must exceed server.heartbeatIntervalMs ({})",
                server.heartbeat_timeout_ms, server.heartbeat_interval_ms
            )));
        }
        let bridge = &self.bridge;
        for (key, value) in [
            ("bridge.defaultScanTimeoutMs", bridge.default_scan_timeout_ms),
            ("bridge.defaultConnectTimeoutMs", bridge.default_connect_timeout_ms),
            ("bridge.maxTimeoutMs", bridge.max_timeout_ms),
            ("bridge.requestTimeoutMs", bridge.request_timeout_ms),
            ("bridge.laneIdleMs", bridge.lane_idle_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{key} must be positive")));
            }
        }
        if bridge.default_scan_timeout_ms > bridge.max_timeout_ms
            || bridge.default_connect_timeout_ms > bridge.max_timeout_ms
        {
            return Err(SettingsError::InvalidValue(
                "default timeouts must not exceed bridge.maxTimeoutMs".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["server"]["maxConnections"], 64);
        assert_eq!(json["bridge"]["requestTimeoutMs"], 60_000);
        assert_eq!(json["logging"]["format"], "pretty");
    }

    #[test]
    fn heartbeat_timeout_must_exceed_interval() {
        let mut settings = Settings::default();
        settings.server.heartbeat_timeout_ms = settings.server.heartbeat_interval_ms;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeatTimeoutMs"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut settings = Settings::default();
        settings.bridge.request_timeout_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("requestTimeoutMs")
        ));
    }

    #[test]
    fn default_timeout_above_max_rejected() {
        let mut settings = Settings::default();
        settings.bridge.max_timeout_ms = 5_000;
        assert!(settings.validate().is_err());
    }
}
