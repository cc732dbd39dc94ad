//! Event broadcaster: turns adapter callbacks into client events.
//!
//! Callbacks arrive on one channel and are handled in order, so a
//! disconnect is never reported ahead of a notification that preceded it.

use std::sync::Arc;

use ble2ws_core::adapter::AdapterEventReceiver;
use ble2ws_core::{AdapterEvent, Event, MessageType};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::broadcast::SessionRegistry;
use crate::devices::ConnectionRegistry;
use crate::handlers::device::{REASON_LINK_LOST, disconnected};
use crate::radio::Radio;
use crate::scan::ScanManager;

/// Routes adapter callbacks to the clients that should see them.
pub struct EventBroadcaster {
    radio: Arc<Radio>,
    scan: Arc<ScanManager>,
    devices: Arc<ConnectionRegistry>,
    sessions: Arc<SessionRegistry>,
}

impl EventBroadcaster {
    /// Create a broadcaster over the bridge's managers.
    pub fn new(
        radio: Arc<Radio>,
        scan: Arc<ScanManager>,
        devices: Arc<ConnectionRegistry>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            radio,
            scan,
            devices,
            sessions,
        }
    }

    /// Drain `events` until the channel closes or `cancel` fires.
    pub async fn run(self, mut events: AdapterEventReceiver, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event).await;
        }
        info!("event broadcaster stopped");
    }

    /// Route one callback.
    pub async fn handle(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::Advertisement(sighting) => {
                let Some(sighted) = self.scan.record_sighting(sighting) else {
                    return;
                };
                let record = sighted.record;
                trace!(address = %record.address, owner = %sighted.owner, "advertisement");
                let event = Event::new(
                    MessageType::DidDiscoverPeripheral,
                    json!({
                        "address": record.address,
                        "name": record.name,
                        "rssi": record.rssi,
                    }),
                );
                let _ = self.sessions.send_event(&[sighted.owner], &event).await;
            }
            AdapterEvent::Disconnected { address } => {
                let Some(recipients) = self.devices.link_lost(&address) else {
                    debug!(address, "disconnect for unknown link ignored");
                    return;
                };
                let _ = self
                    .sessions
                    .send_event(&recipients, &disconnected(&address, REASON_LINK_LOST))
                    .await;
            }
            AdapterEvent::Notification {
                address,
                characteristic,
                value,
            } => {
                let recipients = self.devices.subscribers(&address, &characteristic);
                if recipients.is_empty() {
                    trace!(address, %characteristic, "notification without subscribers");
                    return;
                }
                let event = Event::new(
                    MessageType::DidNotifyStateChange,
                    json!({
                        "address": address,
                        "service": characteristic.service.to_string(),
                        "characteristic": characteristic.characteristic.to_string(),
                        "value": hex::encode(value),
                    }),
                );
                let _ = self.sessions.send_event(&recipients, &event).await;
            }
            AdapterEvent::RadioState { available } => {
                let _ = self.radio.set_available(available);
                if !available {
                    self.scan.radio_lost();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CharTarget;
    use crate::session::ClientSession;
    use ble2ws_core::gatt::CharacteristicRef;
    use ble2ws_core::peripheral::{AdvertisementData, Sighting};
    use ble2ws_core::sim::{DEMO_SENSOR_ADDRESS, SimulatedAdapter};
    use ble2ws_core::{adapter::event_channel, uuids};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const ADDR: &str = DEMO_SENSOR_ADDRESS;

    struct Fixture {
        broadcaster: EventBroadcaster,
        radio: Arc<Radio>,
        scan: Arc<ScanManager>,
        devices: Arc<ConnectionRegistry>,
        sessions: Arc<SessionRegistry>,
    }

    fn fixture() -> Fixture {
        let (tx, _rx) = event_channel();
        let sim = Arc::new(SimulatedAdapter::demo(tx));
        let radio = Arc::new(Radio::new(sim));
        let scan = Arc::new(ScanManager::new(radio.clone(), Duration::from_secs(300)));
        let devices = Arc::new(ConnectionRegistry::new(radio.clone()));
        let sessions = Arc::new(SessionRegistry::new());
        Fixture {
            broadcaster: EventBroadcaster::new(radio.clone(), scan.clone(), devices.clone(), sessions.clone()),
            radio,
            scan,
            devices,
            sessions,
        }
    }

    async fn client(sessions: &SessionRegistry, id: &str) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(16);
        sessions.add(Arc::new(ClientSession::new(id.into(), tx))).await;
        rx
    }

    fn next(rx: &mut mpsc::Receiver<Arc<String>>) -> Value {
        let msg = rx.try_recv().unwrap();
        serde_json::from_str(&msg).unwrap()
    }

    fn sighting() -> Sighting {
        Sighting {
            address: ADDR.into(),
            name: Some("Sensor1".into()),
            rssi: Some(-60),
            advertisement: AdvertisementData::default(),
        }
    }

    #[tokio::test]
    async fn advertisement_goes_to_scan_owner_only() {
        let f = fixture();
        let mut owner = client(&f.sessions, "owner").await;
        let mut other = client(&f.sessions, "other").await;
        f.scan.start_scan("owner", vec![]).await.unwrap();

        f.broadcaster.handle(AdapterEvent::Advertisement(sighting())).await;
        let msg = next(&mut owner);
        assert_eq!(msg["type"], 20);
        assert_eq!(msg["payload"], serde_json::json!({"address": ADDR, "name": "Sensor1", "rssi": -60}));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn advertisement_without_scan_is_dropped() {
        let f = fixture();
        let mut owner = client(&f.sessions, "owner").await;
        f.broadcaster.handle(AdapterEvent::Advertisement(sighting())).await;
        assert!(owner.try_recv().is_err());
    }

    #[tokio::test]
    async fn link_loss_reaches_interest_set() {
        let f = fixture();
        let mut a = client(&f.sessions, "a").await;
        let _ = f.devices.connect("a", ADDR, Duration::from_secs(1), None).await.unwrap();

        f.broadcaster
            .handle(AdapterEvent::Disconnected { address: ADDR.into() })
            .await;
        let msg = next(&mut a);
        assert_eq!(msg["type"], 22);
        assert_eq!(msg["payload"]["reason"], "link_lost");
        assert!(!f.devices.is_connected(ADDR));

        f.broadcaster
            .handle(AdapterEvent::Disconnected { address: ADDR.into() })
            .await;
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn notification_fans_out_to_subscribers() {
        let f = fixture();
        let mut a = client(&f.sessions, "a").await;
        let mut b = client(&f.sessions, "b").await;
        let _ = f.devices.connect("a", ADDR, Duration::from_secs(1), None).await.unwrap();
        let _ = f.devices.discover_services(ADDR).await.unwrap();
        let _ = f.devices.discover_characteristics(ADDR, None).await.unwrap();
        let target = CharTarget {
            service: None,
            characteristic: uuids::from_short(0x2a37),
        };
        f.devices.start_notify("a", ADDR, &target).await.unwrap();

        let characteristic = CharacteristicRef {
            service: uuids::from_short(0x180d),
            characteristic: uuids::from_short(0x2a37),
        };
        f.broadcaster
            .handle(AdapterEvent::Notification {
                address: ADDR.into(),
                characteristic,
                value: vec![0x00, 0x50],
            })
            .await;
        let msg = next(&mut a);
        assert_eq!(msg["type"], 23);
        assert_eq!(msg["payload"]["value"], "0050");
        assert_eq!(msg["payload"]["characteristic"], characteristic.characteristic.to_string());
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn radio_off_ends_scan() {
        let f = fixture();
        f.scan.start_scan("a", vec![]).await.unwrap();
        f.broadcaster.handle(AdapterEvent::RadioState { available: false }).await;
        assert!(!f.radio.is_available());
        assert!(!f.scan.status().scanning);
        f.broadcaster.handle(AdapterEvent::RadioState { available: true }).await;
        assert!(f.radio.is_available());
    }
}
