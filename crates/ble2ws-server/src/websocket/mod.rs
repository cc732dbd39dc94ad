//! `WebSocket` transport: per-connection session loop and heartbeat.

pub mod heartbeat;
pub mod session;
