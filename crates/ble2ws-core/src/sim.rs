//! In-memory radio.
//!
//! [`SimulatedAdapter`] implements [`BleAdapter`] over scripted devices. While
//! scanning it advertises every matching device on a fixed interval (first
//! round immediately). Tests drive the radio-side behaviour directly:
//! [`SimulatedAdapter::notify`], [`SimulatedAdapter::drop_link`],
//! [`SimulatedAdapter::set_available`], [`SimulatedAdapter::fail_next`] and
//! [`SimulatedAdapter::set_latency`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::adapter::{
    AdapterError, AdapterEvent, AdapterEventSender, BleAdapter, DEFAULT_MTU, LinkInfo, ScanFilter,
};
use crate::gatt::{
    CharProperties, CharacteristicInfo, CharacteristicRef, DescriptorInfo, DescriptorRef,
    ServiceInfo, WriteMode,
};
use crate::peripheral::{AdvertisementData, Sighting};
use crate::uuids;

/// Default advertising period while scanning.
pub const DEFAULT_ADVERTISE_INTERVAL: Duration = Duration::from_millis(250);

/// Address of the demo heart-rate sensor.
pub const DEMO_SENSOR_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
/// Address of the demo thermometer.
pub const DEMO_THERMO_ADDRESS: &str = "11:22:33:44:55:66";

// ── Scripted devices ────────────────────────────────────────────────

/// A scripted descriptor.
#[derive(Clone, Debug)]
pub struct SimDescriptor {
    uuid: Uuid,
    value: Vec<u8>,
}

/// A scripted characteristic.
#[derive(Clone, Debug)]
pub struct SimCharacteristic {
    uuid: Uuid,
    properties: CharProperties,
    value: Vec<u8>,
    descriptors: Vec<SimDescriptor>,
}

impl SimCharacteristic {
    /// New characteristic with an empty value.
    pub fn new(uuid: Uuid, properties: CharProperties) -> Self {
        Self {
            uuid,
            properties,
            value: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    /// Initial value.
    #[must_use]
    pub fn value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = value.into();
        self
    }

    /// Add a descriptor.
    #[must_use]
    pub fn descriptor(mut self, uuid: Uuid, value: impl Into<Vec<u8>>) -> Self {
        self.descriptors.push(SimDescriptor {
            uuid,
            value: value.into(),
        });
        self
    }
}

/// A scripted service.
#[derive(Clone, Debug)]
pub struct SimService {
    uuid: Uuid,
    characteristics: Vec<SimCharacteristic>,
}

impl SimService {
    /// New empty service.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: Vec::new(),
        }
    }

    /// Add a characteristic.
    #[must_use]
    pub fn characteristic(mut self, characteristic: SimCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }
}

/// A scripted peripheral.
#[derive(Clone, Debug)]
pub struct SimDevice {
    address: String,
    name: Option<String>,
    rssi: i16,
    mtu: u16,
    requires_passkey: bool,
    manufacturer_data: BTreeMap<u16, Vec<u8>>,
    advertised_services: Vec<Uuid>,
    services: Vec<SimService>,
}

impl SimDevice {
    /// New device; the address is normalised to upper case.
    pub fn new(address: &str, name: Option<&str>) -> Self {
        Self {
            address: address.to_uppercase(),
            name: name.map(ToOwned::to_owned),
            rssi: -60,
            mtu: DEFAULT_MTU,
            requires_passkey: false,
            manufacturer_data: BTreeMap::new(),
            advertised_services: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Advertised signal strength.
    #[must_use]
    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    /// MTU reported on connect.
    #[must_use]
    pub fn mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Pairing needs out-of-band passkey entry.
    #[must_use]
    pub fn requires_passkey(mut self) -> Self {
        self.requires_passkey = true;
        self
    }

    /// Manufacturer data included in advertisements.
    #[must_use]
    pub fn manufacturer(mut self, company: u16, data: impl Into<Vec<u8>>) -> Self {
        let _ = self.manufacturer_data.insert(company, data.into());
        self
    }

    /// Service UUID included in advertisements.
    #[must_use]
    pub fn advertise_service(mut self, uuid: Uuid) -> Self {
        self.advertised_services.push(uuid);
        self
    }

    /// Add a GATT service.
    #[must_use]
    pub fn service(mut self, service: SimService) -> Self {
        self.services.push(service);
        self
    }

    fn sighting(&self) -> Sighting {
        Sighting {
            address: self.address.clone(),
            name: self.name.clone(),
            rssi: Some(self.rssi),
            advertisement: AdvertisementData {
                local_name: self.name.clone(),
                manufacturer_data: self.manufacturer_data.clone(),
                service_uuids: self.advertised_services.clone(),
                service_data: BTreeMap::new(),
                tx_power: None,
                rssi: Some(self.rssi),
            },
        }
    }

    fn find_service(&self, uuid: Uuid) -> Option<&SimService> {
        self.services.iter().find(|s| s.uuid == uuid)
    }

    fn find_characteristic_mut(&mut self, target: &CharacteristicRef) -> Option<&mut SimCharacteristic> {
        self.services
            .iter_mut()
            .find(|s| s.uuid == target.service)?
            .characteristics
            .iter_mut()
            .find(|c| c.uuid == target.characteristic)
    }

    /// Attribute handles in declaration order, starting at 1.
    fn layout(&self) -> Vec<(ServiceInfo, Vec<(CharacteristicInfo, Vec<DescriptorInfo>)>)> {
        let mut handle: u16 = 0;
        let mut next = || {
            handle = handle.saturating_add(1);
            handle
        };
        self.services
            .iter()
            .map(|service| {
                let info = ServiceInfo {
                    uuid: service.uuid,
                    handle: next(),
                    primary: true,
                };
                let characteristics = service
                    .characteristics
                    .iter()
                    .map(|c| {
                        let _declaration = next();
                        let info = CharacteristicInfo {
                            uuid: c.uuid,
                            handle: next(),
                            properties: c.properties,
                        };
                        let descriptors = c
                            .descriptors
                            .iter()
                            .map(|d| DescriptorInfo {
                                uuid: d.uuid,
                                handle: next(),
                            })
                            .collect();
                        (info, descriptors)
                    })
                    .collect();
                (info, characteristics)
            })
            .collect()
    }
}

// ── Adapter ─────────────────────────────────────────────────────────

/// Operations that can be made to fail once with [`SimulatedAdapter::fail_next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SimOp {
    /// [`BleAdapter::probe`].
    Probe,
    /// [`BleAdapter::start_scan`].
    StartScan,
    /// [`BleAdapter::connect`].
    Connect,
    /// [`BleAdapter::disconnect`].
    Disconnect,
    /// [`BleAdapter::pair`] / [`BleAdapter::unpair`].
    Pair,
    /// Any discovery call.
    Discover,
    /// Characteristic or descriptor read.
    Read,
    /// Characteristic or descriptor write.
    Write,
    /// [`BleAdapter::subscribe`] / [`BleAdapter::unsubscribe`].
    Subscribe,
}

/// A write observed by the simulated radio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimWrite {
    /// Device address.
    pub address: String,
    /// Target characteristic.
    pub characteristic: CharacteristicRef,
    /// Target descriptor, for descriptor writes.
    pub descriptor: Option<Uuid>,
    /// Bytes written.
    pub value: Vec<u8>,
    /// Write mode, for characteristic writes.
    pub mode: Option<WriteMode>,
}

#[derive(Default)]
struct SimState {
    devices: BTreeMap<String, SimDevice>,
    connected: HashSet<String>,
    paired: HashSet<String>,
    subscriptions: HashSet<(String, CharacteristicRef)>,
    scan: Option<CancellationToken>,
    unavailable: bool,
    faults: HashMap<SimOp, AdapterError>,
    latency: Duration,
    writes: Vec<SimWrite>,
    scans_started: usize,
    links_opened: usize,
}

impl SimState {
    fn connected_device(&mut self, address: &str) -> Result<&mut SimDevice, AdapterError> {
        if !self.connected.contains(address) {
            return Err(AdapterError::Connection(format!("{address} is not connected")));
        }
        self.devices
            .get_mut(address)
            .ok_or_else(|| AdapterError::NotFound(format!("device {address} not found")))
    }
}

/// Scripted in-memory BLE radio.
#[derive(Clone)]
pub struct SimulatedAdapter {
    state: Arc<Mutex<SimState>>,
    events: AdapterEventSender,
    advertise_interval: Duration,
}

impl SimulatedAdapter {
    /// Empty radio that reports callbacks on `events`.
    pub fn new(events: AdapterEventSender) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            events,
            advertise_interval: DEFAULT_ADVERTISE_INTERVAL,
        }
    }

    /// Radio preloaded with a heart-rate sensor and a thermometer.
    pub fn demo(events: AdapterEventSender) -> Self {
        let adapter = Self::new(events);
        adapter.add_device(demo_sensor());
        adapter.add_device(demo_thermometer());
        adapter
    }

    /// Change the advertising period.
    #[must_use]
    pub fn with_advertise_interval(mut self, interval: Duration) -> Self {
        self.advertise_interval = interval;
        self
    }

    /// Add or replace a device.
    pub fn add_device(&self, device: SimDevice) {
        let _ = self.state.lock().devices.insert(device.address.clone(), device);
    }

    /// Fail the next call of `op` with `error`.
    pub fn fail_next(&self, op: SimOp, error: AdapterError) {
        let _ = self.state.lock().faults.insert(op, error);
    }

    /// Delay applied to connect and GATT operations.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Power the radio on or off. Powering off ends scanning and drops every link.
    pub fn set_available(&self, available: bool) {
        let dropped: Vec<String> = {
            let mut st = self.state.lock();
            st.unavailable = !available;
            if available {
                Vec::new()
            } else {
                if let Some(token) = st.scan.take() {
                    token.cancel();
                }
                st.subscriptions.clear();
                st.connected.drain().collect()
            }
        };
        let _ = self.events.send(AdapterEvent::RadioState { available });
        for address in dropped {
            let _ = self.events.send(AdapterEvent::Disconnected { address });
        }
    }

    /// Emit one advertisement for `address` if the radio is scanning.
    pub fn advertise(&self, address: &str) -> bool {
        let sighting = {
            let st = self.state.lock();
            if st.scan.is_none() {
                return false;
            }
            match st.devices.get(&address.to_uppercase()) {
                Some(device) => device.sighting(),
                None => return false,
            }
        };
        self.events.send(AdapterEvent::Advertisement(sighting)).is_ok()
    }

    /// Push a notification if the characteristic is subscribed. Updates the stored value.
    pub fn notify(&self, address: &str, characteristic: &CharacteristicRef, value: &[u8]) -> bool {
        let address = address.to_uppercase();
        {
            let mut st = self.state.lock();
            if !st.subscriptions.contains(&(address.clone(), *characteristic)) {
                return false;
            }
            if let Some(c) = st
                .devices
                .get_mut(&address)
                .and_then(|d| d.find_characteristic_mut(characteristic))
            {
                c.value = value.to_vec();
            }
        }
        self.events
            .send(AdapterEvent::Notification {
                address,
                characteristic: *characteristic,
                value: value.to_vec(),
            })
            .is_ok()
    }

    /// Drop a link as if the peripheral went out of range.
    pub fn drop_link(&self, address: &str) -> bool {
        let address = address.to_uppercase();
        {
            let mut st = self.state.lock();
            if !st.connected.remove(&address) {
                return false;
            }
            st.subscriptions.retain(|(a, _)| *a != address);
        }
        self.events.send(AdapterEvent::Disconnected { address }).is_ok()
    }

    /// Whether the radio is scanning.
    pub fn is_scanning(&self) -> bool {
        self.state.lock().scan.is_some()
    }

    /// Number of scans started since creation.
    pub fn scans_started(&self) -> usize {
        self.state.lock().scans_started
    }

    /// Number of successful connects since creation.
    pub fn links_opened(&self) -> usize {
        self.state.lock().links_opened
    }

    /// Whether a link to `address` is open.
    pub fn is_connected(&self, address: &str) -> bool {
        self.state.lock().connected.contains(&address.to_uppercase())
    }

    /// Whether notifications are enabled for a characteristic.
    pub fn is_subscribed(&self, address: &str, characteristic: &CharacteristicRef) -> bool {
        self.state
            .lock()
            .subscriptions
            .contains(&(address.to_uppercase(), *characteristic))
    }

    /// Whether `address` is paired.
    pub fn is_paired(&self, address: &str) -> bool {
        self.state.lock().paired.contains(&address.to_uppercase())
    }

    /// Every write seen so far.
    pub fn writes(&self) -> Vec<SimWrite> {
        self.state.lock().writes.clone()
    }

    fn check(&self, op: SimOp) -> Result<(), AdapterError> {
        let mut st = self.state.lock();
        if st.unavailable {
            return Err(AdapterError::Unavailable("radio is powered off".into()));
        }
        match st.faults.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delay(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn spawn_advertiser(&self, filter: ScanFilter, token: CancellationToken) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let interval = self.advertise_interval;
        let _handle = tokio::spawn(async move {
            loop {
                let sightings: Vec<Sighting> = state
                    .lock()
                    .devices
                    .values()
                    .map(SimDevice::sighting)
                    .filter(|s| s.matches_services(&filter.service_uuids))
                    .collect();
                for sighting in sightings {
                    let _ = events.send(AdapterEvent::Advertisement(sighting));
                }
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            debug!("simulated advertiser stopped");
        });
    }
}

fn normalize(address: &str) -> String {
    address.to_uppercase()
}

#[async_trait]
impl BleAdapter for SimulatedAdapter {
    async fn probe(&self) -> Result<(), AdapterError> {
        self.check(SimOp::Probe)
    }

    async fn start_scan(&self, filter: &ScanFilter) -> Result<(), AdapterError> {
        self.check(SimOp::StartScan)?;
        let token = CancellationToken::new();
        {
            let mut st = self.state.lock();
            if let Some(previous) = st.scan.replace(token.clone()) {
                previous.cancel();
            }
            st.scans_started += 1;
        }
        self.spawn_advertiser(filter.clone(), token);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        if let Some(token) = self.state.lock().scan.take() {
            token.cancel();
        }
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<LinkInfo, AdapterError> {
        self.delay().await;
        self.check(SimOp::Connect)?;
        let address = normalize(address);
        let mut st = self.state.lock();
        let device = st
            .devices
            .get(&address)
            .ok_or_else(|| AdapterError::NotFound(format!("device {address} not found")))?;
        let link = LinkInfo {
            name: device.name.clone(),
            mtu: device.mtu,
        };
        let _ = st.connected.insert(address);
        st.links_opened += 1;
        Ok(link)
    }

    async fn disconnect(&self, address: &str) -> Result<(), AdapterError> {
        self.check(SimOp::Disconnect)?;
        let address = normalize(address);
        let mut st = self.state.lock();
        let _ = st.connected.remove(&address);
        st.subscriptions.retain(|(a, _)| *a != address);
        Ok(())
    }

    async fn pair(&self, address: &str) -> Result<(), AdapterError> {
        self.delay().await;
        self.check(SimOp::Pair)?;
        let address = normalize(address);
        let mut st = self.state.lock();
        let device = st
            .devices
            .get(&address)
            .ok_or_else(|| AdapterError::NotFound(format!("device {address} not found")))?;
        if device.requires_passkey {
            return Err(AdapterError::Permission(format!(
                "pairing with {address} requires passkey entry"
            )));
        }
        let _ = st.paired.insert(address);
        Ok(())
    }

    async fn unpair(&self, address: &str) -> Result<(), AdapterError> {
        self.check(SimOp::Pair)?;
        let _ = self.state.lock().paired.remove(&normalize(address));
        Ok(())
    }

    async fn discover_services(&self, address: &str) -> Result<Vec<ServiceInfo>, AdapterError> {
        self.delay().await;
        self.check(SimOp::Discover)?;
        let mut st = self.state.lock();
        let device = st.connected_device(&normalize(address))?;
        Ok(device.layout().into_iter().map(|(s, _)| s).collect())
    }

    async fn discover_characteristics(
        &self,
        address: &str,
        service: Uuid,
    ) -> Result<Vec<CharacteristicInfo>, AdapterError> {
        self.delay().await;
        self.check(SimOp::Discover)?;
        let mut st = self.state.lock();
        let device = st.connected_device(&normalize(address))?;
        device
            .layout()
            .into_iter()
            .find(|(s, _)| s.uuid == service)
            .map(|(_, chars)| chars.into_iter().map(|(c, _)| c).collect())
            .ok_or_else(|| AdapterError::NotFound(format!("service {service} not found")))
    }

    async fn discover_descriptors(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
    ) -> Result<Vec<DescriptorInfo>, AdapterError> {
        self.delay().await;
        self.check(SimOp::Discover)?;
        let mut st = self.state.lock();
        let device = st.connected_device(&normalize(address))?;
        device
            .layout()
            .into_iter()
            .find(|(s, _)| s.uuid == characteristic.service)
            .and_then(|(_, chars)| {
                chars
                    .into_iter()
                    .find(|(c, _)| c.uuid == characteristic.characteristic)
            })
            .map(|(_, descriptors)| descriptors)
            .ok_or_else(|| AdapterError::NotFound(format!("characteristic {characteristic} not found")))
    }

    async fn read_characteristic(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
    ) -> Result<Vec<u8>, AdapterError> {
        self.delay().await;
        self.check(SimOp::Read)?;
        let mut st = self.state.lock();
        let device = st.connected_device(&normalize(address))?;
        device
            .find_characteristic_mut(characteristic)
            .map(|c| c.value.clone())
            .ok_or_else(|| AdapterError::NotFound(format!("characteristic {characteristic} not found")))
    }

    async fn write_characteristic(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), AdapterError> {
        self.delay().await;
        self.check(SimOp::Write)?;
        let address = normalize(address);
        let mut st = self.state.lock();
        let device = st.connected_device(&address)?;
        let target = device.find_characteristic_mut(characteristic).ok_or_else(|| {
            AdapterError::NotFound(format!("characteristic {characteristic} not found"))
        })?;
        target.value = value.to_vec();
        st.writes.push(SimWrite {
            address,
            characteristic: *characteristic,
            descriptor: None,
            value: value.to_vec(),
            mode: Some(mode),
        });
        Ok(())
    }

    async fn read_descriptor(
        &self,
        address: &str,
        descriptor: &DescriptorRef,
    ) -> Result<Vec<u8>, AdapterError> {
        self.delay().await;
        self.check(SimOp::Read)?;
        let mut st = self.state.lock();
        let device = st.connected_device(&normalize(address))?;
        device
            .find_characteristic_mut(&descriptor.characteristic)
            .and_then(|c| c.descriptors.iter().find(|d| d.uuid == descriptor.descriptor))
            .map(|d| d.value.clone())
            .ok_or_else(|| AdapterError::NotFound(format!("descriptor {} not found", descriptor.descriptor)))
    }

    async fn write_descriptor(
        &self,
        address: &str,
        descriptor: &DescriptorRef,
        value: &[u8],
    ) -> Result<(), AdapterError> {
        self.delay().await;
        self.check(SimOp::Write)?;
        let address = normalize(address);
        let mut st = self.state.lock();
        let device = st.connected_device(&address)?;
        let target = device
            .find_characteristic_mut(&descriptor.characteristic)
            .and_then(|c| c.descriptors.iter_mut().find(|d| d.uuid == descriptor.descriptor))
            .ok_or_else(|| {
                AdapterError::NotFound(format!("descriptor {} not found", descriptor.descriptor))
            })?;
        target.value = value.to_vec();
        st.writes.push(SimWrite {
            address,
            characteristic: descriptor.characteristic,
            descriptor: Some(descriptor.descriptor),
            value: value.to_vec(),
            mode: None,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
    ) -> Result<(), AdapterError> {
        self.delay().await;
        self.check(SimOp::Subscribe)?;
        let address = normalize(address);
        let mut st = self.state.lock();
        let device = st.connected_device(&address)?;
        if device.find_characteristic_mut(characteristic).is_none() {
            return Err(AdapterError::NotFound(format!(
                "characteristic {characteristic} not found"
            )));
        }
        let _ = st.subscriptions.insert((address, *characteristic));
        Ok(())
    }

    async fn unsubscribe(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
    ) -> Result<(), AdapterError> {
        self.check(SimOp::Subscribe)?;
        let _ = self
            .state
            .lock()
            .subscriptions
            .remove(&(normalize(address), *characteristic));
        Ok(())
    }
}

// ── Demo devices ────────────────────────────────────────────────────

/// Heart-rate sensor "Sensor1" at [`DEMO_SENSOR_ADDRESS`].
pub fn demo_sensor() -> SimDevice {
    let cccd = uuids::from_short(0x2902);
    SimDevice::new(DEMO_SENSOR_ADDRESS, Some("Sensor1"))
        .rssi(-60)
        .mtu(185)
        .manufacturer(0x0059, [0x01, 0x02])
        .advertise_service(uuids::from_short(0x180d))
        .service(
            SimService::new(uuids::from_short(0x180d))
                .characteristic(
                    SimCharacteristic::new(uuids::from_short(0x2a37), CharProperties::NOTIFY)
                        .value([0x00, 0x48])
                        .descriptor(cccd, [0x00, 0x00]),
                )
                .characteristic(
                    SimCharacteristic::new(uuids::from_short(0x2a38), CharProperties::READ)
                        .value([0x01]),
                )
                .characteristic(SimCharacteristic::new(
                    uuids::from_short(0x2a39),
                    CharProperties::WRITE,
                )),
        )
        .service(
            SimService::new(uuids::from_short(0x180f)).characteristic(
                SimCharacteristic::new(
                    uuids::from_short(0x2a19),
                    CharProperties::READ | CharProperties::NOTIFY,
                )
                .value([0x64])
                .descriptor(cccd, [0x00, 0x00]),
            ),
        )
        .service(
            SimService::new(uuids::from_short(0x180a)).characteristic(
                SimCharacteristic::new(uuids::from_short(0x2a29), CharProperties::READ)
                    .value(*b"ble2ws"),
            ),
        )
}

/// Thermometer "Thermo" at [`DEMO_THERMO_ADDRESS`].
pub fn demo_thermometer() -> SimDevice {
    SimDevice::new(DEMO_THERMO_ADDRESS, Some("Thermo"))
        .rssi(-72)
        .advertise_service(uuids::from_short(0x181a))
        .service(
            SimService::new(uuids::from_short(0x181a)).characteristic(
                SimCharacteristic::new(
                    uuids::from_short(0x2a6e),
                    CharProperties::READ | CharProperties::NOTIFY,
                )
                .value([0x34, 0x08])
                .descriptor(uuids::from_short(0x2902), [0x00, 0x00])
                .descriptor(uuids::from_short(0x2901), *b"Ambient"),
            ),
        )
        .requires_passkey()
}
