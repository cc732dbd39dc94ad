//! GATT attribute model shared by adapters and the connection registry.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Characteristic property bit-set (Core Spec Vol 3, Part G, 3.3.1.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharProperties(u8);

impl CharProperties {
    /// Broadcast.
    pub const BROADCAST: Self = Self(0x01);
    /// Read.
    pub const READ: Self = Self(0x02);
    /// Write without response.
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    /// Write with response.
    pub const WRITE: Self = Self(0x08);
    /// Notify.
    pub const NOTIFY: Self = Self(0x10);
    /// Indicate.
    pub const INDICATE: Self = Self(0x20);
    /// Authenticated signed writes.
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x40);
    /// Extended properties descriptor present.
    pub const EXTENDED_PROPERTIES: Self = Self(0x80);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::BROADCAST, "broadcast"),
        (Self::READ, "read"),
        (Self::WRITE_WITHOUT_RESPONSE, "write-without-response"),
        (Self::WRITE, "write"),
        (Self::NOTIFY, "notify"),
        (Self::INDICATE, "indicate"),
        (Self::AUTHENTICATED_SIGNED_WRITES, "authenticated-signed-writes"),
        (Self::EXTENDED_PROPERTIES, "extended-properties"),
    ];

    /// Wrap raw bits.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Lower-case names of the set properties.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for CharProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A discovered service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service UUID.
    pub uuid: Uuid,
    /// Attribute handle.
    pub handle: u16,
    /// Primary or secondary.
    pub primary: bool,
}

/// A discovered characteristic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Attribute handle.
    pub handle: u16,
    /// Supported operations.
    pub properties: CharProperties,
}

/// A discovered descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorInfo {
    /// Descriptor UUID.
    pub uuid: Uuid,
    /// Attribute handle.
    pub handle: u16,
}

/// Fully-qualified characteristic: the same UUID may appear in several services.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicRef {
    /// Owning service.
    pub service: Uuid,
    /// Characteristic UUID.
    pub characteristic: Uuid,
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// Fully-qualified descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorRef {
    /// Owning characteristic.
    pub characteristic: CharacteristicRef,
    /// Descriptor UUID.
    pub descriptor: Uuid,
}

/// Acknowledged or unacknowledged characteristic write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// ATT Write Request; the peripheral acknowledges.
    #[default]
    WithResponse,
    /// ATT Write Command; fire and forget.
    WithoutResponse,
}

impl WriteMode {
    /// Parse the wire spelling (`"with_response"` / `"without_response"`).
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "with_response" => Some(Self::WithResponse),
            "without_response" => Some(Self::WithoutResponse),
            _ => None,
        }
    }

    /// Property a characteristic needs for this mode.
    pub const fn required_property(self) -> CharProperties {
        match self {
            Self::WithResponse => CharProperties::WRITE,
            Self::WithoutResponse => CharProperties::WRITE_WITHOUT_RESPONSE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_names_in_bit_order() {
        let props = CharProperties::NOTIFY | CharProperties::READ;
        assert_eq!(props.names(), vec!["read", "notify"]);
        assert_eq!(props.bits(), 0x12);
    }

    #[test]
    fn contains_and_intersects() {
        let props = CharProperties::WRITE | CharProperties::WRITE_WITHOUT_RESPONSE;
        assert!(props.contains(CharProperties::WRITE));
        assert!(!props.contains(CharProperties::WRITE | CharProperties::READ));
        assert!(props.intersects(CharProperties::WRITE | CharProperties::READ));
        assert!(!props.intersects(CharProperties::NOTIFY | CharProperties::INDICATE));
    }

    #[test]
    fn write_mode_parse() {
        assert_eq!(WriteMode::parse("with_response"), Some(WriteMode::WithResponse));
        assert_eq!(WriteMode::parse("without_response"), Some(WriteMode::WithoutResponse));
        assert_eq!(WriteMode::parse("fast"), None);
        assert_eq!(WriteMode::default(), WriteMode::WithResponse);
    }

    #[test]
    fn characteristic_refs_order_by_service_first() {
        let a = CharacteristicRef {
            service: Uuid::from_u128(1),
            characteristic: Uuid::from_u128(9),
        };
        let b = CharacteristicRef {
            service: Uuid::from_u128(2),
            characteristic: Uuid::from_u128(0),
        };
        assert!(a < b);
    }
}
