//! # ble2ws-settings
//!
//! Layered configuration for the BLE WebSocket bridge.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`Settings::default()`]
//! 2. **User file**: `~/.ble2ws/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `BLE2WS_*` overrides
//!
//! The binary applies its CLI flags on top.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    read_settings_file, settings_path,
};
pub use types::*;
