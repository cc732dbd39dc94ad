//! Typed commands parsed from decoded frames.

use std::time::Duration;

use ble2ws_core::gatt::WriteMode;
use ble2ws_core::{BridgeError, MessageType, uuids};
use ble2ws_settings::BridgeSettings;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Timeout defaults and bounds applied while parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// DISCOVER and FIND_* default.
    pub default_scan_timeout: Duration,
    /// CONNECT default.
    pub default_connect_timeout: Duration,
    /// Upper bound for client-supplied timeouts.
    pub max_timeout: Duration,
}

impl From<&BridgeSettings> for Limits {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            default_scan_timeout: settings.default_scan_timeout(),
            default_connect_timeout: settings.default_connect_timeout(),
            max_timeout: settings.max_timeout(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&BridgeSettings::default())
    }
}

/// A characteristic named by UUID, optionally scoped to one service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CharTarget {
    /// Service to search in; `None` searches every discovered service.
    pub service: Option<Uuid>,
    /// Characteristic UUID.
    pub characteristic: Uuid,
}

/// A descriptor under a characteristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescTarget {
    /// Owning characteristic.
    pub characteristic: CharTarget,
    /// Descriptor UUID.
    pub descriptor: Uuid,
}

/// A validated command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    // ── Scanning ──
    /// Begin a continuous scan.
    StartScan {
        /// Service filter.
        service_uuids: Vec<Uuid>,
    },
    /// End the caller's continuous scan.
    StopScan,
    /// Bounded scan returning a snapshot.
    Discover {
        /// Scan duration.
        timeout: Duration,
        /// Include advertisement data in the result.
        return_adv: bool,
        /// Service filter.
        service_uuids: Vec<Uuid>,
    },
    /// Bounded scan for an exact name.
    FindByName {
        /// Name to match.
        name: String,
        /// Scan duration.
        timeout: Duration,
    },
    /// Bounded scan for an address.
    FindByAddress {
        /// Upper-cased address.
        address: String,
        /// Scan duration.
        timeout: Duration,
    },

    // ── Links ──
    /// Open or join a link.
    Connect {
        /// Device address.
        address: String,
        /// Connect deadline.
        timeout: Duration,
    },
    /// Close a link.
    Disconnect {
        /// Device address.
        address: String,
    },
    /// Pair.
    Pair {
        /// Device address.
        address: String,
    },
    /// Remove pairing.
    Unpair {
        /// Device address.
        address: String,
    },

    // ── GATT discovery ──
    /// Cached tree.
    Services {
        /// Device address.
        address: String,
    },
    /// Discover services.
    DiscoverServices {
        /// Device address.
        address: String,
    },
    /// Discover characteristics.
    DiscoverCharacteristics {
        /// Device address.
        address: String,
        /// Restrict to one service.
        service: Option<Uuid>,
    },
    /// Discover descriptors.
    DiscoverDescriptors {
        /// Device address.
        address: String,
        /// Restrict to one service.
        service: Option<Uuid>,
        /// Restrict to one characteristic.
        characteristic: Option<Uuid>,
    },

    // ── Attribute I/O ──
    /// Read a characteristic.
    ReadChar {
        /// Device address.
        address: String,
        /// Target characteristic.
        target: CharTarget,
    },
    /// Write a characteristic.
    WriteChar {
        /// Device address.
        address: String,
        /// Target characteristic.
        target: CharTarget,
        /// Bytes to write.
        value: Vec<u8>,
        /// Write type.
        mode: WriteMode,
    },
    /// Subscribe to notifications.
    StartNotify {
        /// Device address.
        address: String,
        /// Target characteristic.
        target: CharTarget,
    },
    /// Unsubscribe from notifications.
    StopNotify {
        /// Device address.
        address: String,
        /// Target characteristic.
        target: CharTarget,
    },
    /// Read a descriptor.
    ReadDescriptor {
        /// Device address.
        address: String,
        /// Target descriptor.
        target: DescTarget,
    },
    /// Write a descriptor.
    WriteDescriptor {
        /// Device address.
        address: String,
        /// Target descriptor.
        target: DescTarget,
        /// Bytes to write.
        value: Vec<u8>,
    },
}

impl Command {
    /// Validate `args` for a command of type `msg_type`.
    pub fn parse(msg_type: MessageType, args: &Map<String, Value>, limits: &Limits) -> Result<Self, BridgeError> {
        let p = Params { args, limits };
        let command = match msg_type {
            MessageType::StartScan => Self::StartScan {
                service_uuids: p.uuid_list("service_uuids")?,
            },
            MessageType::StopScan => Self::StopScan,
            MessageType::Discover => Self::Discover {
                timeout: p.timeout(limits.default_scan_timeout)?,
                return_adv: p.opt_bool("return_adv")?.unwrap_or(false),
                service_uuids: p.uuid_list("service_uuids")?,
            },
            MessageType::FindDeviceByName => {
                let name = p.require_string("name")?;
                if name.is_empty() {
                    return Err(BridgeError::validation("Parameter 'name' must not be empty"));
                }
                Self::FindByName {
                    name,
                    timeout: p.timeout(limits.default_scan_timeout)?,
                }
            }
            MessageType::FindDeviceByAddress => Self::FindByAddress {
                address: p.address()?,
                timeout: p.timeout(limits.default_scan_timeout)?,
            },
            MessageType::Connect => Self::Connect {
                address: p.address()?,
                timeout: p.timeout(limits.default_connect_timeout)?,
            },
            MessageType::Disconnect => Self::Disconnect { address: p.address()? },
            MessageType::Pair => Self::Pair { address: p.address()? },
            MessageType::Unpair => Self::Unpair { address: p.address()? },
            MessageType::Services => Self::Services { address: p.address()? },
            MessageType::DiscoverServices => Self::DiscoverServices { address: p.address()? },
            MessageType::DiscoverCharacteristics => Self::DiscoverCharacteristics {
                address: p.address()?,
                service: p.opt_uuid("service")?,
            },
            MessageType::DiscoverDescriptors => Self::DiscoverDescriptors {
                address: p.address()?,
                service: p.opt_uuid("service")?,
                characteristic: p.opt_uuid("characteristic")?,
            },
            MessageType::ReadGattChar => Self::ReadChar {
                address: p.address()?,
                target: p.char_target()?,
            },
            MessageType::WriteGattChar => Self::WriteChar {
                address: p.address()?,
                target: p.char_target()?,
                value: p.value()?,
                mode: p.write_mode()?,
            },
            MessageType::StartNotify => Self::StartNotify {
                address: p.address()?,
                target: p.char_target()?,
            },
            MessageType::StopNotify => Self::StopNotify {
                address: p.address()?,
                target: p.char_target()?,
            },
            MessageType::ReadGattDescriptor => Self::ReadDescriptor {
                address: p.address()?,
                target: p.desc_target()?,
            },
            MessageType::WriteGattDescriptor => Self::WriteDescriptor {
                address: p.address()?,
                target: p.desc_target()?,
                value: p.value()?,
            },
            other => {
                return Err(BridgeError::UnknownCommand {
                    message: format!("{other} is not a command"),
                });
            }
        };
        Ok(command)
    }

    /// Wire type of this command.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::StartScan { .. } => MessageType::StartScan,
            Self::StopScan => MessageType::StopScan,
            Self::Discover { .. } => MessageType::Discover,
            Self::FindByName { .. } => MessageType::FindDeviceByName,
            Self::FindByAddress { .. } => MessageType::FindDeviceByAddress,
            Self::Connect { .. } => MessageType::Connect,
            Self::Disconnect { .. } => MessageType::Disconnect,
            Self::Pair { .. } => MessageType::Pair,
            Self::Unpair { .. } => MessageType::Unpair,
            Self::Services { .. } => MessageType::Services,
            Self::DiscoverServices { .. } => MessageType::DiscoverServices,
            Self::DiscoverCharacteristics { .. } => MessageType::DiscoverCharacteristics,
            Self::DiscoverDescriptors { .. } => MessageType::DiscoverDescriptors,
            Self::ReadChar { .. } => MessageType::ReadGattChar,
            Self::WriteChar { .. } => MessageType::WriteGattChar,
            Self::StartNotify { .. } => MessageType::StartNotify,
            Self::StopNotify { .. } => MessageType::StopNotify,
            Self::ReadDescriptor { .. } => MessageType::ReadGattDescriptor,
            Self::WriteDescriptor { .. } => MessageType::WriteGattDescriptor,
        }
    }

    /// Lane key: the device address for address-scoped commands, `None`
    /// for scan commands.
    pub fn lane(&self) -> Option<&str> {
        match self {
            Self::StartScan { .. }
            | Self::StopScan
            | Self::Discover { .. }
            | Self::FindByName { .. }
            | Self::FindByAddress { .. } => None,
            Self::Connect { address, .. }
            | Self::Disconnect { address }
            | Self::Pair { address }
            | Self::Unpair { address }
            | Self::Services { address }
            | Self::DiscoverServices { address }
            | Self::DiscoverCharacteristics { address, .. }
            | Self::DiscoverDescriptors { address, .. }
            | Self::ReadChar { address, .. }
            | Self::WriteChar { address, .. }
            | Self::StartNotify { address, .. }
            | Self::StopNotify { address, .. }
            | Self::ReadDescriptor { address, .. }
            | Self::WriteDescriptor { address, .. } => Some(address),
        }
    }

    /// The command's own deadline, if it carries one.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Discover { timeout, .. }
            | Self::FindByName { timeout, .. }
            | Self::FindByAddress { timeout, .. }
            | Self::Connect { timeout, .. } => Some(*timeout),
            _ => None,
        }
    }

    /// Link changes run to completion even if the issuing client leaves;
    /// only the reply is dropped.
    pub fn outlives_client(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Disconnect { .. })
    }
}

// ── Argument extraction ─────────────────────────────────────────────

struct Params<'a> {
    args: &'a Map<String, Value>,
    limits: &'a Limits,
}

impl<'a> Params<'a> {
    /// `null` counts as absent.
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.args.get(key).filter(|v| !v.is_null())
    }

    fn require(&self, key: &str) -> Result<&'a Value, BridgeError> {
        self.get(key)
            .ok_or_else(|| BridgeError::validation(format!("Missing required parameter: {key}")))
    }

    fn require_string(&self, key: &str) -> Result<String, BridgeError> {
        self.require(key)?
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| BridgeError::validation(format!("Parameter '{key}' must be a string")))
    }

    fn opt_bool(&self, key: &str) -> Result<Option<bool>, BridgeError> {
        self.get(key)
            .map(|v| {
                v.as_bool()
                    .ok_or_else(|| BridgeError::validation(format!("Parameter '{key}' must be a boolean")))
            })
            .transpose()
    }

    fn address(&self) -> Result<String, BridgeError> {
        let address = self.require_string("address")?;
        let address = address.trim();
        if address.is_empty() {
            return Err(BridgeError::validation("Parameter 'address' must not be empty"));
        }
        Ok(address.to_uppercase())
    }

    fn timeout(&self, default: Duration) -> Result<Duration, BridgeError> {
        let Some(value) = self.get("timeout") else {
            return Ok(default);
        };
        let secs = value
            .as_f64()
            .ok_or_else(|| BridgeError::validation("Parameter 'timeout' must be a number of seconds"))?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(BridgeError::validation("Parameter 'timeout' must be greater than zero"));
        }
        let timeout = Duration::try_from_secs_f64(secs)
            .map_err(|_| BridgeError::validation("Parameter 'timeout' is out of range"))?;
        if timeout > self.limits.max_timeout {
            return Err(BridgeError::validation(format!(
                "Parameter 'timeout' must not exceed {}s",
                self.limits.max_timeout.as_secs_f64()
            )));
        }
        Ok(timeout)
    }

    fn parse_uuid(key: &str, value: &Value) -> Result<Uuid, BridgeError> {
        value
            .as_str()
            .and_then(uuids::parse)
            .ok_or_else(|| BridgeError::validation(format!("Parameter '{key}' must be a UUID string")))
    }

    fn opt_uuid(&self, key: &str) -> Result<Option<Uuid>, BridgeError> {
        self.get(key).map(|v| Self::parse_uuid(key, v)).transpose()
    }

    fn require_uuid(&self, key: &str) -> Result<Uuid, BridgeError> {
        Self::parse_uuid(key, self.require(key)?)
    }

    fn uuid_list(&self, key: &str) -> Result<Vec<Uuid>, BridgeError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(|v| Self::parse_uuid(key, v)).collect(),
            Some(_) => Err(BridgeError::validation(format!(
                "Parameter '{key}' must be an array of UUID strings"
            ))),
        }
    }

    fn char_target(&self) -> Result<CharTarget, BridgeError> {
        Ok(CharTarget {
            service: self.opt_uuid("service")?,
            characteristic: self.require_uuid("characteristic")?,
        })
    }

    fn desc_target(&self) -> Result<DescTarget, BridgeError> {
        Ok(DescTarget {
            characteristic: self.char_target()?,
            descriptor: self.require_uuid("descriptor")?,
        })
    }

    fn value(&self) -> Result<Vec<u8>, BridgeError> {
        match self.require("value")? {
            Value::String(text) => parse_hex(text),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| BridgeError::validation("Parameter 'value' array items must be integers 0-255"))
                })
                .collect(),
            _ => Err(BridgeError::validation(
                "Parameter 'value' must be a hex string or an array of bytes",
            )),
        }
    }

    fn write_mode(&self) -> Result<WriteMode, BridgeError> {
        if let Some(mode) = self.get("mode") {
            return mode.as_str().and_then(WriteMode::parse).ok_or_else(|| {
                BridgeError::validation("Parameter 'mode' must be \"with_response\" or \"without_response\"")
            });
        }
        Ok(match self.opt_bool("response")? {
            Some(false) => WriteMode::WithoutResponse,
            Some(true) | None => WriteMode::WithResponse,
        })
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>, BridgeError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = body
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&digits).map_err(|e| BridgeError::validation(format!("Parameter 'value' is not valid hex: {e}")))
}
