//! Advertisement sightings and cached peripheral records.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Advertisement payload fields reported by the radio.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdvertisementData {
    /// Complete or shortened local name.
    pub local_name: Option<String>,
    /// Manufacturer-specific data keyed by company identifier.
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Service data keyed by service UUID.
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    /// Advertised transmit power in dBm.
    pub tx_power: Option<i16>,
    /// Signal strength of this sighting in dBm.
    pub rssi: Option<i16>,
}

impl AdvertisementData {
    /// Fold a newer advertisement into this one.
    ///
    /// Scalar fields are replaced when present, maps are extended and
    /// service UUIDs are unioned; platforms split one device's advertising
    /// across several packets.
    pub fn merge(&mut self, newer: Self) {
        if newer.local_name.is_some() {
            self.local_name = newer.local_name;
        }
        if newer.tx_power.is_some() {
            self.tx_power = newer.tx_power;
        }
        if newer.rssi.is_some() {
            self.rssi = newer.rssi;
        }
        self.manufacturer_data.extend(newer.manufacturer_data);
        self.service_data.extend(newer.service_data);
        for uuid in newer.service_uuids {
            if !self.service_uuids.contains(&uuid) {
                self.service_uuids.push(uuid);
            }
        }
    }

    /// JSON form with byte payloads hex-encoded.
    pub fn to_json(&self) -> Value {
        let manufacturer: Map<String, Value> = self
            .manufacturer_data
            .iter()
            .map(|(company, data)| (company.to_string(), Value::String(hex::encode(data))))
            .collect();
        let service_data: Map<String, Value> = self
            .service_data
            .iter()
            .map(|(uuid, data)| (uuid.to_string(), Value::String(hex::encode(data))))
            .collect();
        json!({
            "local_name": self.local_name,
            "manufacturer_data": manufacturer,
            "service_uuids": self.service_uuids.iter().map(Uuid::to_string).collect::<Vec<_>>(),
            "service_data": service_data,
            "tx_power": self.tx_power,
            "rssi": self.rssi,
        })
    }
}

/// One advertisement as delivered by an adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sighting {
    /// Device address (or platform identifier).
    pub address: String,
    /// Device name, if known.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Raw advertisement fields.
    pub advertisement: AdvertisementData,
}

impl Sighting {
    /// Whether this sighting passes a service-UUID filter (empty filter passes everything).
    pub fn matches_services(&self, filter: &[Uuid]) -> bool {
        filter.is_empty()
            || filter.iter().any(|uuid| {
                self.advertisement.service_uuids.contains(uuid)
                    || self.advertisement.service_data.contains_key(uuid)
            })
    }

    /// Advertised or cached name, whichever is known.
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.advertisement.local_name.as_deref())
    }
}

/// Discovery-cache entry for one peripheral.
#[derive(Clone, Debug)]
pub struct PeripheralRecord {
    /// Unique key.
    pub address: String,
    /// Best known name.
    pub name: Option<String>,
    /// Most recent signal strength.
    pub rssi: Option<i16>,
    /// Accumulated advertisement data.
    pub advertisement: AdvertisementData,
    /// Wall-clock time of the latest sighting.
    pub last_seen: DateTime<Utc>,
    seen_at: Instant,
}

impl PeripheralRecord {
    /// Start a record from its first sighting.
    pub fn from_sighting(sighting: Sighting) -> Self {
        let name = sighting.display_name().map(ToOwned::to_owned);
        Self {
            address: sighting.address,
            name,
            rssi: sighting.rssi,
            advertisement: sighting.advertisement,
            last_seen: Utc::now(),
            seen_at: Instant::now(),
        }
    }

    /// Refresh with a newer sighting of the same device.
    pub fn refresh(&mut self, sighting: Sighting) {
        if let Some(name) = sighting.display_name() {
            self.name = Some(name.to_owned());
        }
        if sighting.rssi.is_some() {
            self.rssi = sighting.rssi;
        }
        self.advertisement.merge(sighting.advertisement);
        self.last_seen = Utc::now();
        self.seen_at = Instant::now();
    }

    /// Whether the record is older than `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.seen_at.elapsed() > ttl
    }

    /// JSON form; advertisement fields only when `with_advertisement` is set.
    pub fn to_json(&self, with_advertisement: bool) -> Value {
        let mut value = json!({
            "address": self.address,
            "name": self.name,
            "rssi": self.rssi,
            "state": 0,
            "last_seen": self.last_seen.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        if with_advertisement {
            value["advertisement_data"] = self.advertisement.to_json();
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuids;

    fn sighting(address: &str, name: Option<&str>, rssi: i16) -> Sighting {
        Sighting {
            address: address.into(),
            name: name.map(Into::into),
            rssi: Some(rssi),
            advertisement: AdvertisementData {
                rssi: Some(rssi),
                ..AdvertisementData::default()
            },
        }
    }

    #[test]
    fn record_json_without_advertisement() {
        let record = PeripheralRecord::from_sighting(sighting("AA:BB", Some("Sensor1"), -60));
        let json = record.to_json(false);
        assert_eq!(json["address"], "AA:BB");
        assert_eq!(json["name"], "Sensor1");
        assert_eq!(json["rssi"], -60);
        assert_eq!(json["state"], 0);
        assert!(json["last_seen"].is_string());
        assert!(json.get("advertisement_data").is_none());
    }

    #[test]
    fn advertisement_bytes_are_hex() {
        let mut s = sighting("AA:BB", None, -40);
        let _ = s.advertisement.manufacturer_data.insert(76, vec![0x02, 0x15, 0xff]);
        let _ = s
            .advertisement
            .service_data
            .insert(uuids::from_short(0x180f), vec![0x64]);
        let json = PeripheralRecord::from_sighting(s).to_json(true);
        let adv = &json["advertisement_data"];
        assert_eq!(adv["manufacturer_data"]["76"], "0215ff");
        assert_eq!(
            adv["service_data"]["0000180f-0000-1000-8000-00805f9b34fb"],
            "64"
        );
    }

    #[test]
    fn refresh_keeps_known_name() {
        let mut record = PeripheralRecord::from_sighting(sighting("AA", Some("Sensor1"), -60));
        record.refresh(sighting("AA", None, -50));
        assert_eq!(record.name.as_deref(), Some("Sensor1"));
        assert_eq!(record.rssi, Some(-50));
    }

    #[test]
    fn local_name_used_when_name_missing() {
        let mut s = sighting("AA", None, -60);
        s.advertisement.local_name = Some("Beacon".into());
        let record = PeripheralRecord::from_sighting(s);
        assert_eq!(record.name.as_deref(), Some("Beacon"));
    }

    #[test]
    fn merge_unions_service_uuids() {
        let hr = uuids::from_short(0x180d);
        let bat = uuids::from_short(0x180f);
        let mut a = AdvertisementData {
            service_uuids: vec![hr],
            ..AdvertisementData::default()
        };
        a.merge(AdvertisementData {
            service_uuids: vec![hr, bat],
            ..AdvertisementData::default()
        });
        assert_eq!(a.service_uuids, vec![hr, bat]);
    }

    #[test]
    fn service_filter() {
        let hr = uuids::from_short(0x180d);
        let mut s = sighting("AA", None, -60);
        assert!(s.matches_services(&[]));
        assert!(!s.matches_services(&[hr]));
        s.advertisement.service_uuids.push(hr);
        assert!(s.matches_services(&[hr]));
    }

    #[test]
    fn expiry() {
        let record = PeripheralRecord::from_sighting(sighting("AA", None, -60));
        assert!(!record.is_expired(Duration::from_secs(60)));
        assert!(record.is_expired(Duration::ZERO) || record.seen_at.elapsed().is_zero());
    }
}
