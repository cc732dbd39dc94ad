//! # ble2ws-core
//!
//! Shared building blocks for the BLE-over-WebSocket bridge.
//!
//! - [`protocol`]: integer message types, command decoding, response and event encoding
//! - [`errors`]: the error taxonomy reported to clients
//! - [`peripheral`] / [`gatt`]: advertisement and attribute models
//! - [`adapter`]: the [`BleAdapter`](adapter::BleAdapter) boundary every radio backend implements
//! - [`sim`]: an in-memory radio used by tests and the `simulated` backend

#![deny(unsafe_code)]

pub mod adapter;
pub mod errors;
pub mod gatt;
pub mod peripheral;
pub mod protocol;
pub mod sim;
pub mod uuids;

pub use adapter::{AdapterError, AdapterEvent, BleAdapter, LinkInfo, ScanFilter};
pub use errors::BridgeError;
pub use protocol::{CommandMessage, DecodeError, ErrorBody, Event, MessageType, Response, Status};
