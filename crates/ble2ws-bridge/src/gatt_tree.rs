//! Discovered GATT hierarchy of one connected device.
//!
//! Each level is `None` until its discovery step has run, so lookups can
//! tell "absent" apart from "not discovered yet".

use std::collections::BTreeMap;

use ble2ws_core::BridgeError;
use ble2ws_core::gatt::{
    CharProperties, CharacteristicInfo, CharacteristicRef, DescriptorInfo, DescriptorRef,
    ServiceInfo,
};
use ble2ws_core::uuids;
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Operation a resolved characteristic must support.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// No property check (descriptor access).
    Any,
    /// Read.
    Read,
    /// Write with the given required property.
    Write(CharProperties),
    /// Notify or indicate.
    Notify,
}

impl Access {
    fn check(self, properties: CharProperties, target: &CharacteristicRef) -> Result<(), BridgeError> {
        let (ok, what) = match self {
            Self::Any => (true, String::new()),
            Self::Read => (properties.contains(CharProperties::READ), "read".to_owned()),
            Self::Write(required) => (properties.contains(required), required.names().join("/")),
            Self::Notify => (
                properties.intersects(CharProperties::NOTIFY | CharProperties::INDICATE),
                "notify".to_owned(),
            ),
        };
        if ok {
            Ok(())
        } else {
            Err(BridgeError::validation(format!(
                "characteristic {} does not support {what} (properties: {})",
                target.characteristic,
                properties.names().join(", ")
            )))
        }
    }
}

#[derive(Clone, Debug)]
struct CharNode {
    info: CharacteristicInfo,
    descriptors: Option<BTreeMap<Uuid, DescriptorInfo>>,
}

#[derive(Clone, Debug)]
struct ServiceNode {
    info: ServiceInfo,
    characteristics: Option<BTreeMap<Uuid, CharNode>>,
}

/// Services → characteristics → descriptors, keyed by UUID.
#[derive(Clone, Debug, Default)]
pub struct GattTree {
    services: Option<BTreeMap<Uuid, ServiceNode>>,
}

impl GattTree {
    /// Record discovered services, keeping lower levels of services seen before.
    pub fn set_services(&mut self, services: Vec<ServiceInfo>) {
        let mut previous = self.services.take().unwrap_or_default();
        let next = services
            .into_iter()
            .map(|info| {
                let characteristics = previous
                    .remove(&info.uuid)
                    .and_then(|node| node.characteristics);
                (
                    info.uuid,
                    ServiceNode {
                        info,
                        characteristics,
                    },
                )
            })
            .collect();
        self.services = Some(next);
    }

    /// Record the characteristics of one service.
    pub fn set_characteristics(
        &mut self,
        service: Uuid,
        characteristics: Vec<CharacteristicInfo>,
    ) -> Result<(), BridgeError> {
        let node = self.service_mut(service)?;
        let mut previous = node.characteristics.take().unwrap_or_default();
        node.characteristics = Some(
            characteristics
                .into_iter()
                .map(|info| {
                    let descriptors = previous
                        .remove(&info.uuid)
                        .and_then(|node| node.descriptors);
                    (info.uuid, CharNode { info, descriptors })
                })
                .collect(),
        );
        Ok(())
    }

    /// Record the descriptors of one characteristic.
    pub fn set_descriptors(
        &mut self,
        target: &CharacteristicRef,
        descriptors: Vec<DescriptorInfo>,
    ) -> Result<(), BridgeError> {
        let node = self
            .service_mut(target.service)?
            .characteristics
            .as_mut()
            .and_then(|chars| chars.get_mut(&target.characteristic))
            .ok_or_else(|| {
                BridgeError::not_found(format!("characteristic {} not found", target.characteristic))
            })?;
        node.descriptors = Some(descriptors.into_iter().map(|d| (d.uuid, d)).collect());
        Ok(())
    }

    /// UUIDs of the discovered services.
    pub fn service_uuids(&self) -> Result<Vec<Uuid>, BridgeError> {
        Ok(self.discovered_services()?.keys().copied().collect())
    }

    /// Characteristics with discovered parents, optionally limited to one service.
    pub fn characteristic_refs(&self, service: Option<Uuid>) -> Result<Vec<CharacteristicRef>, BridgeError> {
        let services = self.discovered_services()?;
        let mut refs = Vec::new();
        match service {
            Some(uuid) => {
                let node = services
                    .get(&uuid)
                    .ok_or_else(|| BridgeError::not_found(format!("service {uuid} not found")))?;
                let chars = node.characteristics.as_ref().ok_or_else(|| undiscovered_chars(uuid))?;
                refs.extend(chars.keys().map(|c| CharacteristicRef {
                    service: uuid,
                    characteristic: *c,
                }));
            }
            None => {
                let mut any_discovered = false;
                for (uuid, node) in services {
                    if let Some(chars) = &node.characteristics {
                        any_discovered = true;
                        refs.extend(chars.keys().map(|c| CharacteristicRef {
                            service: *uuid,
                            characteristic: *c,
                        }));
                    }
                }
                if !any_discovered && !services.is_empty() {
                    return Err(BridgeError::not_found(
                        "characteristics not discovered; send DISCOVER_CHARACTERISTICS first",
                    ));
                }
            }
        }
        Ok(refs)
    }

    /// Find a characteristic, checking it supports `access`.
    ///
    /// Without `service`, the UUID must be unique among discovered characteristics.
    pub fn resolve_characteristic(
        &self,
        service: Option<Uuid>,
        characteristic: Uuid,
        access: Access,
    ) -> Result<CharacteristicRef, BridgeError> {
        let services = self.discovered_services()?;
        let (target, properties) = match service {
            Some(svc) => {
                let node = services
                    .get(&svc)
                    .ok_or_else(|| BridgeError::not_found(format!("service {svc} not found")))?;
                let chars = node.characteristics.as_ref().ok_or_else(|| undiscovered_chars(svc))?;
                let found = chars.get(&characteristic).ok_or_else(|| {
                    BridgeError::not_found(format!(
                        "characteristic {characteristic} not found in service {svc}"
                    ))
                })?;
                (
                    CharacteristicRef {
                        service: svc,
                        characteristic,
                    },
                    found.info.properties,
                )
            }
            None => {
                let mut any_discovered = false;
                let mut matches = Vec::new();
                for (svc, node) in services {
                    let Some(chars) = &node.characteristics else {
                        continue;
                    };
                    any_discovered = true;
                    if let Some(found) = chars.get(&characteristic) {
                        matches.push((*svc, found.info.properties));
                    }
                }
                match matches.as_slice() {
                    [(svc, properties)] => (
                        CharacteristicRef {
                            service: *svc,
                            characteristic,
                        },
                        *properties,
                    ),
                    [] if !any_discovered => {
                        return Err(BridgeError::not_found(
                            "characteristics not discovered; send DISCOVER_CHARACTERISTICS first",
                        ));
                    }
                    [] => {
                        return Err(BridgeError::not_found(format!(
                            "characteristic {characteristic} not found"
                        )));
                    }
                    _ => {
                        return Err(BridgeError::validation(format!(
                            "characteristic {characteristic} exists in {} services; specify 'service'",
                            matches.len()
                        )));
                    }
                }
            }
        };
        access.check(properties, &target)?;
        Ok(target)
    }

    /// Find a descriptor under an already-resolved characteristic.
    pub fn resolve_descriptor(
        &self,
        characteristic: CharacteristicRef,
        descriptor: Uuid,
    ) -> Result<DescriptorRef, BridgeError> {
        let node = self
            .discovered_services()?
            .get(&characteristic.service)
            .and_then(|s| s.characteristics.as_ref())
            .and_then(|c| c.get(&characteristic.characteristic))
            .ok_or_else(|| {
                BridgeError::not_found(format!(
                    "characteristic {} not found",
                    characteristic.characteristic
                ))
            })?;
        let descriptors = node.descriptors.as_ref().ok_or_else(|| {
            BridgeError::not_found(format!(
                "descriptors of {} not discovered; send DISCOVER_DESCRIPTORS first",
                characteristic.characteristic
            ))
        })?;
        if !descriptors.contains_key(&descriptor) {
            return Err(BridgeError::not_found(format!(
                "descriptor {descriptor} not found on characteristic {}",
                characteristic.characteristic
            )));
        }
        Ok(DescriptorRef {
            characteristic,
            descriptor,
        })
    }

    /// JSON object of services keyed by UUID; undiscovered levels are omitted.
    pub fn to_json(&self) -> Value {
        let Some(services) = &self.services else {
            return Value::Object(Map::new());
        };
        let services: Map<String, Value> = services
            .values()
            .map(|node| (node.info.uuid.to_string(), service_json(node)))
            .collect();
        Value::Object(services)
    }

    fn discovered_services(&self) -> Result<&BTreeMap<Uuid, ServiceNode>, BridgeError> {
        self.services.as_ref().ok_or_else(|| {
            BridgeError::not_found("services not discovered; send DISCOVER_SERVICES first")
        })
    }

    fn service_mut(&mut self, uuid: Uuid) -> Result<&mut ServiceNode, BridgeError> {
        self.services
            .as_mut()
            .ok_or_else(|| {
                BridgeError::not_found("services not discovered; send DISCOVER_SERVICES first")
            })?
            .get_mut(&uuid)
            .ok_or_else(|| BridgeError::not_found(format!("service {uuid} not found")))
    }
}

fn undiscovered_chars(service: Uuid) -> BridgeError {
    BridgeError::not_found(format!(
        "characteristics of service {service} not discovered; send DISCOVER_CHARACTERISTICS first"
    ))
}

fn service_json(node: &ServiceNode) -> Value {
    let mut value = json!({
        "uuid": node.info.uuid.to_string(),
        "handle": node.info.handle,
        "description": uuids::describe(&node.info.uuid),
        "primary": node.info.primary,
    });
    if let Some(chars) = &node.characteristics {
        let chars: Map<String, Value> = chars
            .values()
            .map(|c| (c.info.uuid.to_string(), characteristic_json(c)))
            .collect();
        value["characteristics"] = Value::Object(chars);
    }
    value
}

fn characteristic_json(node: &CharNode) -> Value {
    let mut value = json!({
        "uuid": node.info.uuid.to_string(),
        "handle": node.info.handle,
        "description": uuids::describe(&node.info.uuid),
        "properties": node.info.properties.bits(),
        "property_names": node.info.properties.names(),
    });
    if let Some(descriptors) = &node.descriptors {
        let descriptors: Map<String, Value> = descriptors
            .values()
            .map(|d| {
                (
                    d.uuid.to_string(),
                    json!({
                        "uuid": d.uuid.to_string(),
                        "handle": d.handle,
                        "description": uuids::describe(&d.uuid),
                    }),
                )
            })
            .collect();
        value["descriptors"] = Value::Object(descriptors);
    }
    value
}
