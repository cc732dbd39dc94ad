//! Bluetooth UUID parsing and well-known names.

use uuid::Uuid;

/// Low 96 bits of the Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;
const BASE_MASK: u128 = (1 << 96) - 1;

/// Expand a 16- or 32-bit assigned number onto the Bluetooth base UUID.
pub const fn from_short(short: u32) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | BASE_UUID)
}

/// The assigned number if `uuid` lives on the Bluetooth base UUID.
pub fn to_short(uuid: &Uuid) -> Option<u32> {
    let raw = uuid.as_u128();
    if raw & BASE_MASK == BASE_UUID {
        u32::try_from(raw >> 96).ok()
    } else {
        None
    }
}

/// Parse a full 128-bit UUID or a 16/32-bit short form (`"2a37"`, `"0x2A37"`).
pub fn parse(text: &str) -> Option<Uuid> {
    let trimmed = text.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if (hex.len() == 4 || hex.len() == 8) && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return u32::from_str_radix(hex, 16).ok().map(from_short);
    }
    Uuid::parse_str(trimmed).ok()
}

/// Human-readable name from the Bluetooth SIG assigned numbers, or `"Unknown"`.
pub fn describe(uuid: &Uuid) -> &'static str {
    let Some(short) = to_short(uuid) else {
        return "Unknown";
    };
    match short {
        // Services
        0x1800 => "Generic Access",
        0x1801 => "Generic Attribute",
        0x1805 => "Current Time Service",
        0x180A => "Device Information",
        0x180D => "Heart Rate",
        0x180F => "Battery Service",
        0x1809 => "Health Thermometer",
        0x1812 => "Human Interface Device",
        0x1816 => "Cycling Speed and Cadence",
        0x1818 => "Cycling Power",
        0x181A => "Environmental Sensing",
        // Characteristics
        0x2A00 => "Device Name",
        0x2A01 => "Appearance",
        0x2A04 => "Peripheral Preferred Connection Parameters",
        0x2A05 => "Service Changed",
        0x2A19 => "Battery Level",
        0x2A1C => "Temperature Measurement",
        0x2A24 => "Model Number String",
        0x2A25 => "Serial Number String",
        0x2A26 => "Firmware Revision String",
        0x2A27 => "Hardware Revision String",
        0x2A28 => "Software Revision String",
        0x2A29 => "Manufacturer Name String",
        0x2A2B => "Current Time",
        0x2A37 => "Heart Rate Measurement",
        0x2A38 => "Body Sensor Location",
        0x2A39 => "Heart Rate Control Point",
        0x2A5B => "CSC Measurement",
        0x2A6E => "Temperature",
        0x2A6F => "Humidity",
        // Descriptors
        0x2900 => "Characteristic Extended Properties",
        0x2901 => "Characteristic User Description",
        0x2902 => "Client Characteristic Configuration",
        0x2903 => "Server Characteristic Configuration",
        0x2904 => "Characteristic Presentation Format",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_expands_onto_base() {
        let uuid = parse("2a37").unwrap();
        assert_eq!(uuid.to_string(), "00002a37-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn hex_prefix_and_case_accepted() {
        assert_eq!(parse("0x2A37"), parse("2a37"));
    }

    #[test]
    fn full_uuid_parsed() {
        let text = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
        assert_eq!(parse(text).unwrap().to_string(), text);
    }

    #[test]
    fn garbage_rejected() {
        assert!(parse("").is_none());
        assert!(parse("xyz").is_none());
        assert!(parse("12345").is_none());
    }

    #[test]
    fn to_short_only_for_base_uuids() {
        assert_eq!(to_short(&from_short(0x180d)), Some(0x180d));
        let custom = parse("6e400001-b5a3-f393-e0a9-e50e24dcca9e").unwrap();
        assert_eq!(to_short(&custom), None);
    }

    #[test]
    fn describes_well_known_numbers() {
        assert_eq!(describe(&from_short(0x180d)), "Heart Rate");
        assert_eq!(describe(&from_short(0x2902)), "Client Characteristic Configuration");
        assert_eq!(describe(&from_short(0xfff0)), "Unknown");
    }
}
