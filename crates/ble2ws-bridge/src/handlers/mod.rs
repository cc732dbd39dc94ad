//! Command handlers.
//!
//! [`execute`] routes a validated [`Command`] to its handler. A handler
//! returns the reply's `result` plus any events the command produces; the
//! dispatcher sends the reply first and then the events.

pub mod device;
pub mod gatt;
pub mod scan;

use ble2ws_core::{BridgeError, Event};
use serde_json::Value;

use crate::command::Command;
use crate::context::BridgeContext;

/// An event and who receives it.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Client ids.
    pub recipients: Vec<String>,
    /// The event.
    pub event: Event,
}

/// What a successful command produced.
#[derive(Clone, Debug, Default)]
pub struct Reply {
    /// Reply `result`; `None` omits the key.
    pub result: Option<Value>,
    /// Events sent after the reply.
    pub events: Vec<Delivery>,
}

impl Reply {
    /// Success with no result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Success carrying `result`.
    pub fn value(result: Value) -> Self {
        Self {
            result: Some(result),
            events: Vec::new(),
        }
    }

    /// Attach an event for `recipients`.
    #[must_use]
    pub fn with_event(mut self, recipients: Vec<String>, event: Event) -> Self {
        self.events.push(Delivery { recipients, event });
        self
    }
}

/// Run `command` on behalf of `client_id`.
pub async fn execute(ctx: &BridgeContext, client_id: &str, command: Command) -> Result<Reply, BridgeError> {
    match command {
        Command::StartScan { service_uuids } => scan::start_scan(ctx, client_id, service_uuids).await,
        Command::StopScan => scan::stop_scan(ctx, client_id).await,
        Command::Discover {
            timeout,
            return_adv,
            service_uuids,
        } => scan::discover(ctx, client_id, timeout, return_adv, service_uuids).await,
        Command::FindByName { name, timeout } => scan::find_by_name(ctx, client_id, name, timeout).await,
        Command::FindByAddress { address, timeout } => {
            scan::find_by_address(ctx, client_id, address, timeout).await
        }

        Command::Connect { address, timeout } => device::connect(ctx, client_id, &address, timeout).await,
        Command::Disconnect { address } => device::disconnect(ctx, client_id, &address).await,
        Command::Pair { address } => device::pair(ctx, &address).await,
        Command::Unpair { address } => device::unpair(ctx, &address).await,

        Command::Services { address } => gatt::services(ctx, &address),
        Command::DiscoverServices { address } => gatt::discover_services(ctx, &address).await,
        Command::DiscoverCharacteristics { address, service } => {
            gatt::discover_characteristics(ctx, &address, service).await
        }
        Command::DiscoverDescriptors {
            address,
            service,
            characteristic,
        } => gatt::discover_descriptors(ctx, &address, service, characteristic).await,
        Command::ReadChar { address, target } => gatt::read_characteristic(ctx, &address, &target).await,
        Command::WriteChar {
            address,
            target,
            value,
            mode,
        } => gatt::write_characteristic(ctx, &address, &target, &value, mode).await,
        Command::StartNotify { address, target } => gatt::start_notify(ctx, client_id, &address, &target).await,
        Command::StopNotify { address, target } => gatt::stop_notify(ctx, client_id, &address, &target).await,
        Command::ReadDescriptor { address, target } => gatt::read_descriptor(ctx, &address, &target).await,
        Command::WriteDescriptor {
            address,
            target,
            value,
        } => gatt::write_descriptor(ctx, &address, &target, &value).await,
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Arc;
    use std::time::Duration;

    use ble2ws_core::adapter::event_channel;
    use ble2ws_core::sim::SimulatedAdapter;

    use crate::context::BridgeContext;
    use crate::devices::ConnectionRegistry;
    use crate::radio::Radio;
    use crate::scan::ScanManager;

    /// Context over the demo radio. Advertisements are not pumped; tests that
    /// need the discovery cache feed it through `ctx.scan.record_sighting`.
    pub fn make_test_context() -> (Arc<SimulatedAdapter>, BridgeContext) {
        let (tx, _rx) = event_channel();
        let sim = Arc::new(SimulatedAdapter::demo(tx));
        let radio = Arc::new(Radio::new(sim.clone()));
        let ctx = BridgeContext {
            scan: Arc::new(ScanManager::new(radio.clone(), Duration::from_secs(300))),
            devices: Arc::new(ConnectionRegistry::new(radio.clone())),
            radio,
        };
        (sim, ctx)
    }
}
