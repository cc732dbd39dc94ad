//! # ble2ws-server
//!
//! Axum HTTP + `WebSocket` transport for the bridge.
//!
//! - `GET /` and `GET /ws`: `WebSocket` upgrade, one [`Bridge`](ble2ws_bridge::Bridge) session per client
//! - `GET /health`: liveness plus radio and connection counters
//! - `GET /metrics`: Prometheus text when a recorder is installed
//! - Heartbeat pings and dead-client detection
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::BridgeServer;
