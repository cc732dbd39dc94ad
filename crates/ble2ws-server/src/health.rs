//! `/health` endpoint.

use std::time::Instant;

use ble2ws_bridge::BridgeStatus;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current `WebSocket` connection count.
    pub connections: usize,
    /// Last known radio availability.
    pub radio_available: bool,
    /// Whether a scan session is active.
    pub scanning: bool,
    /// Devices with an open link.
    pub connected_devices: usize,
}

/// Build a health response from the bridge's status.
pub fn health_check(start_time: Instant, status: &BridgeStatus) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: status.clients,
        radio_available: status.radio_available,
        scanning: status.scanning,
        connected_devices: status.connected_devices,
    }
}
