//! Device connection registry.
//!
//! Owns one [`ConnectionRecord`] per connected address: the link's
//! cancellation token, the clients interested in the link, the discovered
//! GATT tree and the notification subscribers per characteristic.
//!
//! Operations on one address are serialised by the caller (see
//! [`crate::lanes`]), so the records map is only locked for short critical
//! sections and never across an adapter call.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ble2ws_core::gatt::{CharacteristicRef, DescriptorRef, WriteMode};
use ble2ws_core::peripheral::PeripheralRecord;
use ble2ws_core::{AdapterError, BridgeError};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::{CharTarget, DescTarget};
use crate::gatt_tree::{Access, GattTree};
use crate::radio::Radio;

/// State of one connected peripheral.
pub struct ConnectionRecord {
    /// Device address.
    pub address: String,
    /// Name reported at connect time.
    pub name: Option<String>,
    /// Negotiated MTU.
    pub mtu: u16,
    /// Signal strength from the discovery cache at connect time.
    pub rssi: Option<i16>,
    /// When the link was established.
    pub connected_at: DateTime<Utc>,
    link: CancellationToken,
    owners: HashSet<String>,
    tree: GattTree,
    subscriptions: BTreeMap<CharacteristicRef, HashSet<String>>,
}

impl ConnectionRecord {
    fn peripheral_json(&self) -> Value {
        json!({
            "address": self.address,
            "name": self.name,
            "rssi": self.rssi,
            "state": 1,
            "last_seen": self.connected_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "mtu_size": self.mtu,
        })
    }

    fn interested(&self) -> BTreeSet<String> {
        self.owners
            .iter()
            .chain(self.subscriptions.values().flatten())
            .cloned()
            .collect()
    }
}

/// Outcome of CONNECT.
#[derive(Clone, Debug)]
pub struct Connected {
    /// Peripheral object with `state: 1`, `mtu_size` and `already_connected`.
    pub peripheral: Value,
    /// Whether the caller joined an existing link.
    pub already_connected: bool,
}

/// Registry of connection records keyed by upper-case address.
pub struct ConnectionRegistry {
    radio: Arc<Radio>,
    records: Mutex<HashMap<String, ConnectionRecord>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(radio: Arc<Radio>) -> Self {
        Self {
            radio,
            records: Mutex::new(HashMap::new()),
        }
    }

    // ── Link lifecycle ──────────────────────────────────────────────

    /// Open a link, or join the existing one.
    pub async fn connect(
        &self,
        client_id: &str,
        address: &str,
        timeout: Duration,
        cached: Option<PeripheralRecord>,
    ) -> Result<Connected, BridgeError> {
        if let Some(record) = self.records.lock().get_mut(address) {
            let _ = record.owners.insert(client_id.to_owned());
            let mut peripheral = record.peripheral_json();
            peripheral["already_connected"] = Value::Bool(true);
            debug!(address, client_id, "joined existing connection");
            return Ok(Connected {
                peripheral,
                already_connected: true,
            });
        }

        let adapter = self.radio.adapter();
        let link = match tokio::time::timeout(timeout, self.radio.call(adapter.connect(address))).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                if let Err(e) = adapter.disconnect(address).await {
                    debug!(address, error = %e, "cleanup after connect timeout failed");
                }
                return Err(BridgeError::timeout(format!(
                    "connecting to {address} timed out after {:.1}s",
                    timeout.as_secs_f64()
                )));
            }
        };

        let record = ConnectionRecord {
            address: address.to_owned(),
            name: link
                .name
                .or_else(|| cached.as_ref().and_then(|c| c.name.clone())),
            mtu: link.mtu,
            rssi: cached.as_ref().and_then(|c| c.rssi),
            connected_at: Utc::now(),
            link: CancellationToken::new(),
            owners: HashSet::from([client_id.to_owned()]),
            tree: GattTree::default(),
            subscriptions: BTreeMap::new(),
        };
        let mut peripheral = record.peripheral_json();
        peripheral["already_connected"] = Value::Bool(false);
        let _ = self.records.lock().insert(address.to_owned(), record);
        info!(address, client_id, "device connected");
        Ok(Connected {
            peripheral,
            already_connected: false,
        })
    }

    /// Fail pending and queued work on `address` right away. Called when
    /// DISCONNECT is received, before it reaches the lane.
    pub fn cancel_link(&self, address: &str) {
        if let Some(record) = self.records.lock().get(address) {
            record.link.cancel();
        }
    }

    /// Tear down the link. Returns every client that should hear about it.
    pub async fn disconnect(&self, client_id: &str, address: &str) -> Result<Vec<String>, BridgeError> {
        let record = self
            .records
            .lock()
            .remove(address)
            .ok_or_else(|| not_connected(address))?;
        record.link.cancel();
        if let Err(e) = self.radio.call(self.radio.adapter().disconnect(address)).await {
            warn!(address, error = %e, "adapter disconnect failed; record removed anyway");
        }
        info!(address, client_id, "device disconnected");
        let mut recipients = record.interested();
        let _ = recipients.insert(client_id.to_owned());
        Ok(recipients.into_iter().collect())
    }

    /// The adapter reported an unsolicited disconnect. Returns the clients
    /// to notify, or `None` when no record existed.
    pub fn link_lost(&self, address: &str) -> Option<Vec<String>> {
        let record = self.records.lock().remove(address)?;
        record.link.cancel();
        warn!(address, "link lost");
        Some(record.interested().into_iter().collect())
    }

    /// Pair without requiring a connection record.
    pub async fn pair(&self, address: &str) -> Result<(), BridgeError> {
        self.radio.call(self.radio.adapter().pair(address)).await
    }

    /// Remove pairing.
    pub async fn unpair(&self, address: &str) -> Result<(), BridgeError> {
        self.radio.call(self.radio.adapter().unpair(address)).await
    }

    // ── GATT discovery ──────────────────────────────────────────────

    /// Cached GATT tree and link parameters, without touching the radio.
    pub fn services(&self, address: &str) -> Result<Value, BridgeError> {
        let records = self.records.lock();
        let record = records.get(address).ok_or_else(|| not_connected(address))?;
        Ok(json!({
            "address": record.address,
            "name": record.name,
            "state": 1,
            "mtu_size": record.mtu,
            "services": record.tree.to_json(),
        }))
    }

    /// Discover primary services.
    pub async fn discover_services(&self, address: &str) -> Result<Value, BridgeError> {
        let services = self
            .guarded(address, self.radio.adapter().discover_services(address))
            .await?;
        self.with_record(address, |record| {
            record.tree.set_services(services);
            Ok(tree_json(record))
        })
    }

    /// Discover characteristics of one service, or of every discovered service.
    pub async fn discover_characteristics(
        &self,
        address: &str,
        service: Option<Uuid>,
    ) -> Result<Value, BridgeError> {
        let targets = self.with_record(address, |record| match service {
            Some(uuid) => {
                if record.tree.service_uuids()?.contains(&uuid) {
                    Ok(vec![uuid])
                } else {
                    Err(BridgeError::not_found(format!("service {uuid} not found")))
                }
            }
            None => record.tree.service_uuids(),
        })?;
        for uuid in targets {
            let characteristics = self
                .guarded(address, self.radio.adapter().discover_characteristics(address, uuid))
                .await?;
            self.with_record(address, |record| {
                record.tree.set_characteristics(uuid, characteristics)
            })?;
        }
        self.with_record(address, |record| Ok(tree_json(record)))
    }

    /// Discover descriptors of one characteristic, or of every discovered one.
    pub async fn discover_descriptors(
        &self,
        address: &str,
        service: Option<Uuid>,
        characteristic: Option<Uuid>,
    ) -> Result<Value, BridgeError> {
        let targets = self.with_record(address, |record| match characteristic {
            Some(uuid) => record
                .tree
                .resolve_characteristic(service, uuid, Access::Any)
                .map(|target| vec![target]),
            None => record.tree.characteristic_refs(service),
        })?;
        for target in targets {
            let descriptors = self
                .guarded(address, self.radio.adapter().discover_descriptors(address, &target))
                .await?;
            self.with_record(address, |record| record.tree.set_descriptors(&target, descriptors))?;
        }
        self.with_record(address, |record| Ok(tree_json(record)))
    }

    // ── Characteristic and descriptor I/O ───────────────────────────

    /// Read a characteristic value.
    pub async fn read_characteristic(&self, address: &str, target: &CharTarget) -> Result<Vec<u8>, BridgeError> {
        let resolved = self.resolve(address, target, Access::Read)?;
        self.guarded(address, self.radio.adapter().read_characteristic(address, &resolved))
            .await
    }

    /// Write a characteristic value.
    pub async fn write_characteristic(
        &self,
        address: &str,
        target: &CharTarget,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), BridgeError> {
        let resolved = self.resolve(address, target, Access::Write(mode.required_property()))?;
        self.guarded(
            address,
            self.radio
                .adapter()
                .write_characteristic(address, &resolved, value, mode),
        )
        .await
    }

    /// Read a descriptor value.
    pub async fn read_descriptor(&self, address: &str, target: &DescTarget) -> Result<Vec<u8>, BridgeError> {
        let resolved = self.resolve_descriptor(address, target)?;
        self.guarded(address, self.radio.adapter().read_descriptor(address, &resolved))
            .await
    }

    /// Write a descriptor value.
    pub async fn write_descriptor(
        &self,
        address: &str,
        target: &DescTarget,
        value: &[u8],
    ) -> Result<(), BridgeError> {
        let resolved = self.resolve_descriptor(address, target)?;
        self.guarded(
            address,
            self.radio.adapter().write_descriptor(address, &resolved, value),
        )
        .await
    }

    // ── Notifications ───────────────────────────────────────────────

    /// Subscribe `client_id`. The adapter subscription is created for the
    /// first subscriber; repeats by the same client are no-ops.
    pub async fn start_notify(
        &self,
        client_id: &str,
        address: &str,
        target: &CharTarget,
    ) -> Result<(), BridgeError> {
        let resolved = self.resolve(address, target, Access::Notify)?;
        let first = self.with_record(address, |record| {
            let subscribers = record.subscriptions.get(&resolved);
            if subscribers.is_some_and(|s| s.contains(client_id)) {
                return Ok(None);
            }
            Ok(Some(subscribers.is_none_or(HashSet::is_empty)))
        })?;
        let Some(first) = first else {
            return Ok(());
        };
        if first {
            self.guarded(address, self.radio.adapter().subscribe(address, &resolved))
                .await?;
        }
        self.with_record(address, |record| {
            let _ = record
                .subscriptions
                .entry(resolved)
                .or_default()
                .insert(client_id.to_owned());
            Ok(())
        })?;
        debug!(address, client_id, characteristic = %resolved, "notifications enabled");
        Ok(())
    }

    /// Unsubscribe `client_id`; the adapter subscription goes with the last one.
    pub async fn stop_notify(
        &self,
        client_id: &str,
        address: &str,
        target: &CharTarget,
    ) -> Result<(), BridgeError> {
        let resolved = self.resolve(address, target, Access::Any)?;
        let last = self.with_record(address, |record| {
            let subscribers = record
                .subscriptions
                .get_mut(&resolved)
                .filter(|s| s.contains(client_id))
                .ok_or_else(|| {
                    BridgeError::not_found(format!(
                        "no notification subscription on {}",
                        resolved.characteristic
                    ))
                })?;
            let _ = subscribers.remove(client_id);
            Ok(subscribers.is_empty())
        })?;
        if last {
            self.prune_subscription(address, resolved).await?;
        }
        debug!(address, client_id, characteristic = %resolved, "notifications disabled");
        Ok(())
    }

    /// Clients subscribed to a characteristic.
    pub fn subscribers(&self, address: &str, characteristic: &CharacteristicRef) -> Vec<String> {
        self.records
            .lock()
            .get(address)
            .and_then(|r| r.subscriptions.get(characteristic))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ── Client departure ────────────────────────────────────────────

    /// Drop `client_id` from every interest set and subscriber set.
    /// Returns the addresses that need [`tidy`](Self::tidy).
    pub fn release_client(&self, client_id: &str) -> Vec<String> {
        let mut records = self.records.lock();
        records
            .values_mut()
            .filter_map(|record| {
                let mut touched = record.owners.remove(client_id);
                for subscribers in record.subscriptions.values_mut() {
                    touched |= subscribers.remove(client_id);
                }
                touched.then(|| record.address.clone())
            })
            .collect()
    }

    /// Drop `client_id` from the record of `address` only. Returns whether
    /// the record needs [`tidy`](Self::tidy).
    pub fn leave(&self, client_id: &str, address: &str) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(address) else {
            return false;
        };
        let mut touched = record.owners.remove(client_id);
        for subscribers in record.subscriptions.values_mut() {
            touched |= subscribers.remove(client_id);
        }
        touched
    }

    /// Remove adapter subscriptions nobody wants and tear the link down
    /// when no client is left.
    pub async fn tidy(&self, address: &str) {
        let orphaned: Vec<CharacteristicRef> = match self.records.lock().get(address) {
            Some(record) => record
                .subscriptions
                .iter()
                .filter(|(_, s)| s.is_empty())
                .map(|(c, _)| *c)
                .collect(),
            None => return,
        };
        for characteristic in orphaned {
            if let Err(e) = self.prune_subscription(address, characteristic).await {
                debug!(address, error = %e, "unsubscribe of orphaned subscription failed");
            }
        }

        let idle = {
            let mut records = self.records.lock();
            let is_idle = records
                .get(address)
                .is_some_and(|r| r.owners.is_empty() && r.subscriptions.is_empty());
            if is_idle { records.remove(address) } else { None }
        };
        if let Some(record) = idle {
            record.link.cancel();
            if let Err(e) = self.radio.adapter().disconnect(address).await {
                warn!(address, error = %e, "disconnect of abandoned link failed");
            }
            info!(address, "link closed: no interested clients remain");
        }
    }

    /// Disconnect every device.
    pub async fn disconnect_all(&self) {
        let records: Vec<ConnectionRecord> = self.records.lock().drain().map(|(_, r)| r).collect();
        for record in records {
            record.link.cancel();
            if let Err(e) = self.radio.adapter().disconnect(&record.address).await {
                warn!(address = %record.address, error = %e, "disconnect during shutdown failed");
            }
        }
    }

    /// Number of connected devices.
    pub fn connected_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether `address` has a connection record.
    pub fn is_connected(&self, address: &str) -> bool {
        self.records.lock().contains_key(address)
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn prune_subscription(&self, address: &str, characteristic: CharacteristicRef) -> Result<(), BridgeError> {
        let result = self
            .guarded(address, self.radio.adapter().unsubscribe(address, &characteristic))
            .await;
        if let Some(record) = self.records.lock().get_mut(address) {
            if record.subscriptions.get(&characteristic).is_some_and(HashSet::is_empty) {
                let _ = record.subscriptions.remove(&characteristic);
            }
        }
        result
    }

    fn with_record<T>(
        &self,
        address: &str,
        f: impl FnOnce(&mut ConnectionRecord) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let mut records = self.records.lock();
        let record = records.get_mut(address).ok_or_else(|| not_connected(address))?;
        f(record)
    }

    fn resolve(&self, address: &str, target: &CharTarget, access: Access) -> Result<CharacteristicRef, BridgeError> {
        self.with_record(address, |record| {
            record
                .tree
                .resolve_characteristic(target.service, target.characteristic, access)
        })
    }

    fn resolve_descriptor(&self, address: &str, target: &DescTarget) -> Result<DescriptorRef, BridgeError> {
        self.with_record(address, |record| {
            let characteristic = record.tree.resolve_characteristic(
                target.characteristic.service,
                target.characteristic.characteristic,
                Access::Any,
            )?;
            record.tree.resolve_descriptor(characteristic, target.descriptor)
        })
    }

    /// Run an adapter call that fails with `ConnectionError` as soon as the
    /// link is cancelled.
    async fn guarded<T>(
        &self,
        address: &str,
        op: impl Future<Output = Result<T, AdapterError>>,
    ) -> Result<T, BridgeError> {
        let link = {
            let records = self.records.lock();
            let record = records.get(address).ok_or_else(|| not_connected(address))?;
            record.link.clone()
        };
        if link.is_cancelled() {
            return Err(closing(address));
        }
        tokio::select! {
            biased;
            () = link.cancelled() => Err(closing(address)),
            result = self.radio.call(op) => result,
        }
    }
}

fn tree_json(record: &ConnectionRecord) -> Value {
    json!({
        "address": record.address,
        "services": record.tree.to_json(),
    })
}

fn not_connected(address: &str) -> BridgeError {
    BridgeError::connection(format!("{address} is not connected"))
}

fn closing(address: &str) -> BridgeError {
    BridgeError::connection(format!("link to {address} was closed"))
}
