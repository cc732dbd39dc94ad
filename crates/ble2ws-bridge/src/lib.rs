//! # ble2ws-bridge
//!
//! The protocol bridge between WebSocket clients and the shared BLE radio.
//!
//! - [`Bridge`]: decodes frames, validates arguments, dispatches commands and
//!   guarantees exactly one reply per command
//! - [`scan::ScanManager`]: the single scan session and the discovery cache
//! - [`devices::ConnectionRegistry`]: connection records, GATT trees and
//!   notification subscriptions
//! - [`lanes::DeviceLanes`]: per-address FIFO execution
//! - [`events::EventBroadcaster`]: routes radio callbacks to client sessions
//! - [`session::ClientSession`] / [`broadcast::SessionRegistry`]: per-client
//!   state and outbound delivery

#![deny(unsafe_code)]

pub mod broadcast;
pub mod command;
pub mod context;
pub mod devices;
pub mod dispatcher;
pub mod events;
pub mod gatt_tree;
pub mod handlers;
pub mod lanes;
pub mod radio;
pub mod scan;
pub mod session;

pub use broadcast::SessionRegistry;
pub use command::{Command, Limits};
pub use context::BridgeContext;
pub use dispatcher::{Bridge, BridgeStatus};
pub use session::ClientSession;
