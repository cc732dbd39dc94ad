//! The platform BLE boundary.
//!
//! A backend implements [`BleAdapter`] for request/response style operations
//! and pushes radio callbacks (advertisements, link loss, notifications,
//! power changes) as [`AdapterEvent`]s into the channel it was built with.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::BridgeError;
use crate::gatt::{
    CharacteristicInfo, CharacteristicRef, DescriptorInfo, DescriptorRef, ServiceInfo, WriteMode,
};
use crate::peripheral::Sighting;

/// Failure reported by a backend.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// The radio is missing or powered off.
    #[error("bluetooth adapter unavailable: {0}")]
    Unavailable(String),
    /// Device or attribute unknown to the platform.
    #[error("{0}")]
    NotFound(String),
    /// Link-level failure.
    #[error("{0}")]
    Connection(String),
    /// Platform-side timeout.
    #[error("{0}")]
    Timeout(String),
    /// Pairing or authorization refused.
    #[error("{0}")]
    Permission(String),
    /// Any other platform error.
    #[error("bluetooth backend error: {0}")]
    Backend(String),
}

impl From<AdapterError> for BridgeError {
    fn from(err: AdapterError) -> Self {
        let message = err.to_string();
        match err {
            AdapterError::Unavailable(_) => Self::AdapterUnavailable { message },
            AdapterError::NotFound(_) => Self::NotFound { message },
            AdapterError::Connection(_) | AdapterError::Backend(_) => Self::Connection { message },
            AdapterError::Timeout(_) => Self::Timeout { message },
            AdapterError::Permission(_) => Self::Permission { message },
        }
    }
}

/// Radio callback bridged into the server's task domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterEvent {
    /// An advertisement was received while scanning.
    Advertisement(Sighting),
    /// A link dropped without being asked to.
    Disconnected {
        /// Device address.
        address: String,
    },
    /// A subscribed characteristic pushed a value.
    Notification {
        /// Device address.
        address: String,
        /// Source characteristic.
        characteristic: CharacteristicRef,
        /// Raw value.
        value: Vec<u8>,
    },
    /// The radio was powered on or off.
    RadioState {
        /// Whether the radio can be used.
        available: bool,
    },
}

/// Sending half handed to a backend.
pub type AdapterEventSender = mpsc::UnboundedSender<AdapterEvent>;
/// Receiving half drained by the event broadcaster.
pub type AdapterEventReceiver = mpsc::UnboundedReceiver<AdapterEvent>;

/// Create the callback channel connecting a backend to the bridge.
pub fn event_channel() -> (AdapterEventSender, AdapterEventReceiver) {
    mpsc::unbounded_channel()
}

/// Scan filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Only report devices advertising one of these services (empty = all).
    pub service_uuids: Vec<Uuid>,
}

/// Link parameters returned by a successful connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    /// Device name, when the platform knows one.
    pub name: Option<String>,
    /// Negotiated ATT MTU.
    pub mtu: u16,
}

/// Minimum ATT MTU.
pub const DEFAULT_MTU: u16 = 23;

/// Operations a platform BLE backend provides.
///
/// Every method may suspend. Timeouts are applied by the caller; a backend
/// only reports [`AdapterError::Timeout`] for platform-side deadlines.
#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    /// Check that the radio is present and powered.
    async fn probe(&self) -> Result<(), AdapterError>;

    /// Begin scanning; advertisements arrive as [`AdapterEvent::Advertisement`].
    async fn start_scan(&self, filter: &ScanFilter) -> Result<(), AdapterError>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<(), AdapterError>;

    /// Open a GATT link.
    async fn connect(&self, address: &str) -> Result<LinkInfo, AdapterError>;

    /// Close a GATT link. Requested disconnects are not reported as events.
    async fn disconnect(&self, address: &str) -> Result<(), AdapterError>;

    /// Pair with a device.
    async fn pair(&self, address: &str) -> Result<(), AdapterError>;

    /// Remove pairing.
    async fn unpair(&self, address: &str) -> Result<(), AdapterError>;

    /// Discover primary services.
    async fn discover_services(&self, address: &str) -> Result<Vec<ServiceInfo>, AdapterError>;

    /// Discover the characteristics of one service.
    async fn discover_characteristics(
        &self,
        address: &str,
        service: Uuid,
    ) -> Result<Vec<CharacteristicInfo>, AdapterError>;

    /// Discover the descriptors of one characteristic.
    async fn discover_descriptors(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
    ) -> Result<Vec<DescriptorInfo>, AdapterError>;

    /// Read a characteristic value.
    async fn read_characteristic(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
    ) -> Result<Vec<u8>, AdapterError>;

    /// Write a characteristic value.
    async fn write_characteristic(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), AdapterError>;

    /// Read a descriptor value.
    async fn read_descriptor(
        &self,
        address: &str,
        descriptor: &DescriptorRef,
    ) -> Result<Vec<u8>, AdapterError>;

    /// Write a descriptor value.
    async fn write_descriptor(
        &self,
        address: &str,
        descriptor: &DescriptorRef,
        value: &[u8],
    ) -> Result<(), AdapterError>;

    /// Enable notifications; values arrive as [`AdapterEvent::Notification`].
    async fn subscribe(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
    ) -> Result<(), AdapterError>;

    /// Disable notifications.
    async fn unsubscribe(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
    ) -> Result<(), AdapterError>;
}
