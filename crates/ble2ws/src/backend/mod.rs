//! Radio backend selection.

#[cfg(feature = "btleplug")]
pub mod host;
pub mod simulated;

use std::sync::Arc;

use anyhow::Result;
use ble2ws_core::BleAdapter;
use ble2ws_core::adapter::AdapterEventSender;
use clap::ValueEnum;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Which radio the bridge drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-memory radio with demo devices.
    Simulated,
    /// Host Bluetooth stack via `btleplug` (requires the `btleplug` feature).
    Btleplug,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "btleplug") {
            Self::Btleplug
        } else {
            Self::Simulated
        }
    }
}

/// A started backend: the adapter plus its background tasks.
pub struct Radio {
    /// The adapter handed to the bridge.
    pub adapter: Arc<dyn BleAdapter>,
    /// Backend-owned tasks, aborted at shutdown.
    pub tasks: Vec<JoinHandle<()>>,
}

/// Start `backend`, reporting callbacks on `events`.
pub async fn start(backend: Backend, events: AdapterEventSender) -> Result<Radio> {
    let radio = match backend {
        Backend::Simulated => {
            let (sim, ticker) = simulated::start(events);
            Radio {
                adapter: sim,
                tasks: vec![ticker],
            }
        }
        Backend::Btleplug => start_btleplug(events).await?,
    };
    match radio.adapter.probe().await {
        Ok(()) => info!(?backend, "radio ready"),
        Err(e) => warn!(?backend, error = %e, "radio not available yet"),
    }
    Ok(radio)
}

#[cfg(feature = "btleplug")]
async fn start_btleplug(events: AdapterEventSender) -> Result<Radio> {
    use anyhow::Context;

    let (adapter, pump) = host::BtleplugAdapter::start(events)
        .await
        .context("Failed to open bluetooth adapter")?;
    Ok(Radio {
        adapter,
        tasks: vec![pump],
    })
}

#[cfg(not(feature = "btleplug"))]
#[allow(clippy::unused_async)]
async fn start_btleplug(_events: AdapterEventSender) -> Result<Radio> {
    anyhow::bail!("this build has no btleplug support; rebuild with `--features btleplug`")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ble2ws_core::adapter::event_channel;

    #[tokio::test]
    async fn simulated_backend_starts() {
        let (tx, _rx) = event_channel();
        let radio = start(Backend::Simulated, tx).await.unwrap();
        radio.adapter.probe().await.unwrap();
        assert_eq!(radio.tasks.len(), 1);
        for task in radio.tasks {
            task.abort();
        }
    }

    #[cfg(not(feature = "btleplug"))]
    #[tokio::test]
    async fn btleplug_without_feature_is_an_error() {
        let (tx, _rx) = event_channel();
        let err = start(Backend::Btleplug, tx).await.err().unwrap();
        assert!(err.to_string().contains("btleplug"));
    }

    #[test]
    fn default_matches_build() {
        let expected = if cfg!(feature = "btleplug") {
            Backend::Btleplug
        } else {
            Backend::Simulated
        };
        assert_eq!(Backend::default(), expected);
    }
}
