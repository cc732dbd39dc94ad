//! Shared radio handle with availability tracking.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ble2ws_core::{AdapterError, BleAdapter, BridgeError};
use tracing::{info, warn};

/// The one physical radio, as seen by the scan manager and connection registry.
///
/// Once an operation reports the radio unavailable, every later call first
/// re-probes the adapter and fails fast with `AdapterUnavailableError` until
/// the probe succeeds.
pub struct Radio {
    adapter: Arc<dyn BleAdapter>,
    available: AtomicBool,
}

impl Radio {
    /// Wrap a backend. The radio is assumed available until told otherwise.
    pub fn new(adapter: Arc<dyn BleAdapter>) -> Self {
        Self {
            adapter,
            available: AtomicBool::new(true),
        }
    }

    /// The backend.
    pub fn adapter(&self) -> &dyn BleAdapter {
        self.adapter.as_ref()
    }

    /// Last known availability.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Record an availability change. Returns `true` if the state flipped.
    pub fn set_available(&self, available: bool) -> bool {
        let previous = self.available.swap(available, Ordering::AcqRel);
        if previous != available {
            if available {
                info!("bluetooth radio available");
            } else {
                warn!("bluetooth radio unavailable");
            }
        }
        previous != available
    }

    /// Succeed if the radio is usable, probing it when it was last seen down.
    pub async fn ensure_available(&self) -> Result<(), BridgeError> {
        if self.is_available() {
            return Ok(());
        }
        match self.adapter.probe().await {
            Ok(()) => {
                let _ = self.set_available(true);
                Ok(())
            }
            Err(err) => Err(BridgeError::unavailable(err.to_string())),
        }
    }

    /// Run an adapter operation, tracking unavailability.
    pub async fn call<T>(
        &self,
        op: impl Future<Output = Result<T, AdapterError>>,
    ) -> Result<T, BridgeError> {
        self.ensure_available().await?;
        op.await.map_err(|err| {
            if matches!(err, AdapterError::Unavailable(_)) {
                let _ = self.set_available(false);
            }
            BridgeError::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ble2ws_core::adapter::event_channel;
    use ble2ws_core::sim::{DEMO_SENSOR_ADDRESS, SimulatedAdapter};

    fn radio() -> (Arc<SimulatedAdapter>, Radio) {
        let (tx, _rx) = event_channel();
        let sim = Arc::new(SimulatedAdapter::demo(tx));
        let radio = Radio::new(sim.clone());
        (sim, radio)
    }

    #[tokio::test]
    async fn unavailable_error_marks_radio_down() {
        let (sim, radio) = radio();
        sim.set_available(false);
        let err = radio
            .call(radio.adapter().connect(DEMO_SENSOR_ADDRESS))
            .await
            .unwrap_err();
        assert_matches!(err, BridgeError::AdapterUnavailable { .. });
        assert!(!radio.is_available());

        // Still down: the probe fails before the operation is attempted.
        let err = radio
            .call(radio.adapter().connect(DEMO_SENSOR_ADDRESS))
            .await
            .unwrap_err();
        assert_matches!(err, BridgeError::AdapterUnavailable { .. });
    }

    #[tokio::test]
    async fn probe_restores_availability() {
        let (sim, radio) = radio();
        let _ = radio.set_available(false);
        sim.set_available(true);
        radio
            .call(radio.adapter().connect(DEMO_SENSOR_ADDRESS))
            .await
            .unwrap();
        assert!(radio.is_available());
    }

    #[test]
    fn set_available_reports_changes() {
        let (_sim, radio) = radio();
        assert!(!radio.set_available(true));
        assert!(radio.set_available(false));
        assert!(!radio.set_available(false));
    }
}
