//! Host radio through `btleplug`.
//!
//! The first adapter reported by the platform manager is used. Central events
//! are translated into [`AdapterEvent`]s by a background task; each connected
//! peripheral gets its own notification forwarder.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use ble2ws_core::adapter::{AdapterEventSender, DEFAULT_MTU};
use ble2ws_core::gatt::{
    CharProperties, CharacteristicInfo, CharacteristicRef, DescriptorInfo, DescriptorRef,
    ServiceInfo, WriteMode,
};
use ble2ws_core::peripheral::{AdvertisementData, Sighting};
use ble2ws_core::{AdapterError, AdapterEvent, BleAdapter, LinkInfo, ScanFilter};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Descriptor, Manager as _, Peripheral as _,
    PeripheralProperties, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// [`BleAdapter`] over the host Bluetooth stack.
pub struct BtleplugAdapter {
    adapter: Adapter,
    events: AdapterEventSender,
    peripherals: Mutex<HashMap<String, Peripheral>>,
    forwarders: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl BtleplugAdapter {
    /// Open the first host adapter and start translating its central events.
    pub async fn start(events: AdapterEventSender) -> Result<(Arc<Self>, JoinHandle<()>), AdapterError> {
        let manager = Manager::new().await.map_err(map_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(map_error)?
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Unavailable("no bluetooth adapter found".into()))?;
        if let Ok(info) = adapter.adapter_info().await {
            info!(adapter = %info, "using bluetooth adapter");
        }

        let this = Arc::new(Self {
            adapter,
            events,
            peripherals: Mutex::new(HashMap::new()),
            forwarders: Mutex::new(HashMap::new()),
        });
        let central_events = this.adapter.events().await.map_err(map_error)?;
        let pump = tokio::spawn(this.clone().run_central_events(central_events));
        Ok((this, pump))
    }

    async fn run_central_events(
        self: Arc<Self>,
        mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    ) {
        while let Some(event) = events.next().await {
            match event {
                CentralEvent::DeviceDiscovered(id)
                | CentralEvent::DeviceUpdated(id)
                | CentralEvent::ManufacturerDataAdvertisement { id, .. }
                | CentralEvent::ServiceDataAdvertisement { id, .. }
                | CentralEvent::ServicesAdvertisement { id, .. } => self.on_advertisement(&id).await,
                CentralEvent::DeviceDisconnected(id) => self.on_disconnected(&id).await,
                other => trace!(?other, "central event ignored"),
            }
        }
        warn!("central event stream ended");
        let _ = self.events.send(AdapterEvent::RadioState { available: false });
    }

    async fn on_advertisement(&self, id: &PeripheralId) {
        let Ok(peripheral) = self.adapter.peripheral(id).await else {
            return;
        };
        let Ok(Some(properties)) = peripheral.properties().await else {
            return;
        };
        let address = peripheral.address().to_string().to_uppercase();
        let sighting = sighting(&address, properties);
        let _ = self.peripherals.lock().insert(address, peripheral);
        let _ = self.events.send(AdapterEvent::Advertisement(sighting));
    }

    async fn on_disconnected(&self, id: &PeripheralId) {
        let Ok(peripheral) = self.adapter.peripheral(id).await else {
            return;
        };
        let address = peripheral.address().to_string().to_uppercase();
        if let Some(forwarder) = self.forwarders.lock().remove(&address) {
            forwarder.abort();
        }
        debug!(address, "link lost");
        let _ = self.events.send(AdapterEvent::Disconnected { address });
    }

    /// Resolve an address to a platform peripheral, refreshing the cache once.
    async fn peripheral(&self, address: &str) -> Result<Peripheral, AdapterError> {
        let address = address.to_uppercase();
        if let Some(p) = self.peripherals.lock().get(&address) {
            return Ok(p.clone());
        }
        for p in self.adapter.peripherals().await.map_err(map_error)? {
            let key = p.address().to_string().to_uppercase();
            let _ = self.peripherals.lock().insert(key, p);
        }
        self.peripherals
            .lock()
            .get(&address)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(format!("device {address} not found")))
    }

    async fn characteristic(
        &self,
        address: &str,
        target: &CharacteristicRef,
    ) -> Result<(Peripheral, Characteristic), AdapterError> {
        let peripheral = self.peripheral(address).await?;
        let found = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == target.characteristic && c.service_uuid == target.service)
            .ok_or_else(|| AdapterError::NotFound(format!("characteristic {target} not found")))?;
        Ok((peripheral, found))
    }

    async fn descriptor(
        &self,
        address: &str,
        target: &DescriptorRef,
    ) -> Result<(Peripheral, Descriptor), AdapterError> {
        let (peripheral, characteristic) = self.characteristic(address, &target.characteristic).await?;
        let found = characteristic
            .descriptors
            .into_iter()
            .find(|d| d.uuid == target.descriptor)
            .ok_or_else(|| {
                AdapterError::NotFound(format!("descriptor {} not found", target.descriptor))
            })?;
        Ok((peripheral, found))
    }

    /// Forward the peripheral's notification stream as adapter events.
    async fn spawn_forwarder(&self, address: &str, peripheral: &Peripheral) -> Result<(), AdapterError> {
        let mut stream = peripheral.notifications().await.map_err(map_error)?;
        let events = self.events.clone();
        let owner = address.to_owned();
        let handle = tokio::spawn(async move {
            while let Some(n) = stream.next().await {
                let event = AdapterEvent::Notification {
                    address: owner.clone(),
                    characteristic: CharacteristicRef {
                        service: n.service_uuid,
                        characteristic: n.uuid,
                    },
                    value: n.value,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self.forwarders.lock().insert(address.to_owned(), handle) {
            previous.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn probe(&self) -> Result<(), AdapterError> {
        self.adapter.adapter_info().await.map(|_| ()).map_err(map_error)
    }

    async fn start_scan(&self, filter: &ScanFilter) -> Result<(), AdapterError> {
        let filter = btleplug::api::ScanFilter {
            services: filter.service_uuids.clone(),
        };
        self.adapter.start_scan(filter).await.map_err(map_error)
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.adapter.stop_scan().await.map_err(map_error)
    }

    async fn connect(&self, address: &str) -> Result<LinkInfo, AdapterError> {
        let peripheral = self.peripheral(address).await?;
        if !peripheral.is_connected().await.map_err(map_error)? {
            peripheral.connect().await.map_err(map_error)?;
        }
        self.spawn_forwarder(&address.to_uppercase(), &peripheral).await?;
        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name);
        // btleplug does not expose the negotiated MTU
        Ok(LinkInfo {
            name,
            mtu: DEFAULT_MTU,
        })
    }

    async fn disconnect(&self, address: &str) -> Result<(), AdapterError> {
        let address = address.to_uppercase();
        if let Some(forwarder) = self.forwarders.lock().remove(&address) {
            forwarder.abort();
        }
        let peripheral = self.peripheral(&address).await?;
        peripheral.disconnect().await.map_err(map_error)
    }

    async fn pair(&self, _address: &str) -> Result<(), AdapterError> {
        Err(AdapterError::Permission(
            "pairing is managed by the operating system on this backend".into(),
        ))
    }

    async fn unpair(&self, _address: &str) -> Result<(), AdapterError> {
        Err(AdapterError::Permission(
            "pairing is managed by the operating system on this backend".into(),
        ))
    }

    async fn discover_services(&self, address: &str) -> Result<Vec<ServiceInfo>, AdapterError> {
        let peripheral = self.peripheral(address).await?;
        peripheral.discover_services().await.map_err(map_error)?;
        Ok(peripheral
            .services()
            .into_iter()
            .map(|s| ServiceInfo {
                uuid: s.uuid,
                handle: 0,
                primary: s.primary,
            })
            .collect())
    }

    async fn discover_characteristics(
        &self,
        address: &str,
        service: Uuid,
    ) -> Result<Vec<CharacteristicInfo>, AdapterError> {
        let peripheral = self.peripheral(address).await?;
        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| AdapterError::NotFound(format!("service {service} not found")))?;
        Ok(service
            .characteristics
            .into_iter()
            .map(|c| CharacteristicInfo {
                uuid: c.uuid,
                handle: 0,
                properties: CharProperties::from_bits(c.properties.bits()),
            })
            .collect())
    }

    async fn discover_descriptors(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
    ) -> Result<Vec<DescriptorInfo>, AdapterError> {
        let (_, found) = self.characteristic(address, characteristic).await?;
        Ok(found
            .descriptors
            .into_iter()
            .map(|d| DescriptorInfo {
                uuid: d.uuid,
                handle: 0,
            })
            .collect())
    }

    async fn read_characteristic(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
    ) -> Result<Vec<u8>, AdapterError> {
        let (peripheral, found) = self.characteristic(address, characteristic).await?;
        peripheral.read(&found).await.map_err(map_error)
    }

    async fn write_characteristic(
        &self,
        address: &str,
        characteristic: &CharacteristicRef,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), AdapterError> {
        let (peripheral, found) = self.characteristic(address, characteristic).await?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        peripheral.write(&found, value, write_type).await.map_err(map_error)
    }

    async fn read_descriptor(&self, address: &str, descriptor: &DescriptorRef) -> Result<Vec<u8>, AdapterError> {
        let (peripheral, found) = self.descriptor(address, descriptor).await?;
        peripheral.read_descriptor(&found).await.map_err(map_error)
    }

    async fn write_descriptor(
        &self,
        address: &str,
        descriptor: &DescriptorRef,
        value: &[u8],
    ) -> Result<(), AdapterError> {
        let (peripheral, found) = self.descriptor(address, descriptor).await?;
        peripheral
            .write_descriptor(&found, value)
            .await
            .map_err(map_error)
    }

    async fn subscribe(&self, address: &str, characteristic: &CharacteristicRef) -> Result<(), AdapterError> {
        let (peripheral, found) = self.characteristic(address, characteristic).await?;
        peripheral.subscribe(&found).await.map_err(map_error)
    }

    async fn unsubscribe(&self, address: &str, characteristic: &CharacteristicRef) -> Result<(), AdapterError> {
        let (peripheral, found) = self.characteristic(address, characteristic).await?;
        peripheral.unsubscribe(&found).await.map_err(map_error)
    }
}

fn sighting(address: &str, properties: PeripheralProperties) -> Sighting {
    let advertisement = AdvertisementData {
        local_name: properties.local_name.clone(),
        manufacturer_data: properties.manufacturer_data.into_iter().collect::<BTreeMap<_, _>>(),
        service_uuids: properties.services,
        service_data: properties.service_data.into_iter().collect::<BTreeMap<_, _>>(),
        tx_power: properties.tx_power_level,
        rssi: properties.rssi,
    };
    Sighting {
        address: address.to_owned(),
        name: properties.local_name,
        rssi: properties.rssi,
        advertisement,
    }
}

fn map_error(err: btleplug::Error) -> AdapterError {
    match err {
        btleplug::Error::PermissionDenied => AdapterError::Permission(err.to_string()),
        btleplug::Error::DeviceNotFound
        | btleplug::Error::NoSuchCharacteristic
        | btleplug::Error::UnexpectedCharacteristic => AdapterError::NotFound(err.to_string()),
        btleplug::Error::NotConnected => AdapterError::Connection(err.to_string()),
        btleplug::Error::TimedOut(_) => AdapterError::Timeout(err.to_string()),
        other => AdapterError::Backend(other.to_string()),
    }
}
