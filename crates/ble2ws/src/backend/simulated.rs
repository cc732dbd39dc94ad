//! Demo radio: the simulated adapter plus a heart-rate ticker.

use std::sync::Arc;
use std::time::Duration;

use ble2ws_core::adapter::AdapterEventSender;
use ble2ws_core::gatt::CharacteristicRef;
use ble2ws_core::sim::{DEMO_SENSOR_ADDRESS, SimulatedAdapter};
use ble2ws_core::uuids;
use tokio::task::JoinHandle;
use tracing::info;

/// Period of the demo heart-rate notifications.
pub const HEART_RATE_PERIOD: Duration = Duration::from_secs(1);

/// Heart Rate Measurement on the demo sensor.
pub fn heart_rate_measurement() -> CharacteristicRef {
    CharacteristicRef {
        service: uuids::from_short(0x180d),
        characteristic: uuids::from_short(0x2a37),
    }
}

/// Heart Rate Measurement value: flags byte, then a u8 bpm.
pub fn heart_rate_value(tick: u64) -> [u8; 2] {
    // 60..=99 bpm, sawtooth
    let bpm = 60 + u8::try_from(tick % 40).unwrap_or(0);
    [0x00, bpm]
}

/// Build the demo radio and start its ticker.
pub fn start(events: AdapterEventSender) -> (Arc<SimulatedAdapter>, JoinHandle<()>) {
    let sim = Arc::new(SimulatedAdapter::demo(events));
    info!(
        sensor = DEMO_SENSOR_ADDRESS,
        "simulated radio ready with demo devices"
    );
    let ticker = tokio::spawn(run_ticker(sim.clone(), HEART_RATE_PERIOD));
    (sim, ticker)
}

/// Push a heart-rate notification every `period` while someone is subscribed.
async fn run_ticker(sim: Arc<SimulatedAdapter>, period: Duration) {
    let characteristic = heart_rate_measurement();
    let mut interval = tokio::time::interval(period);
    let mut tick: u64 = 0;
    loop {
        let _ = interval.tick().await;
        // notify is a no-op until a client subscribes
        if sim.notify(DEMO_SENSOR_ADDRESS, &characteristic, &heart_rate_value(tick)) {
            tick += 1;
        }
    }
}
