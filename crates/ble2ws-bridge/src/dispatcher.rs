//! Command dispatcher.
//!
//! Every decodable frame that names a command and a `uid` produces exactly
//! one response: success, handler error, ceiling timeout or caught panic.
//! The only exception is a client that closes before the reply exists;
//! its pending commands are cancelled and nothing is sent. CONNECT and
//! DISCONNECT are not cancelled: they finish on their lane so the shared
//! link state stays consistent, and a link opened for a departed client
//! is released right away.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ble2ws_core::adapter::AdapterEventReceiver;
use ble2ws_core::protocol::{self, Response};
use ble2ws_core::{BleAdapter, BridgeError};
use ble2ws_settings::BridgeSettings;
use futures::FutureExt;
use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::broadcast::SessionRegistry;
use crate::command::{Command, Limits};
use crate::context::BridgeContext;
use crate::devices::ConnectionRegistry;
use crate::events::EventBroadcaster;
use crate::handlers::{self, Reply};
use crate::lanes::DeviceLanes;
use crate::radio::Radio;
use crate::scan::ScanManager;
use crate::session::ClientSession;

/// Added to a command's own timeout to form its ceiling.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Commands slower than their own timeout plus this are logged.
const SLOW_COMMAND: Duration = Duration::from_secs(5);

/// Point-in-time view for health reporting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeStatus {
    /// Last known radio availability.
    pub radio_available: bool,
    /// Whether a scan session is active.
    pub scanning: bool,
    /// Devices with a connection record.
    pub connected_devices: usize,
    /// Connected clients.
    pub clients: usize,
}

/// The bridge between client sessions and the radio.
pub struct Bridge {
    ctx: Arc<BridgeContext>,
    sessions: Arc<SessionRegistry>,
    lanes: DeviceLanes,
    limits: Limits,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl Bridge {
    /// Build a bridge over `adapter`.
    pub fn new(adapter: Arc<dyn BleAdapter>, settings: &BridgeSettings) -> Arc<Self> {
        let radio = Arc::new(Radio::new(adapter));
        let ctx = BridgeContext {
            scan: Arc::new(ScanManager::new(Arc::clone(&radio), settings.cache_ttl())),
            devices: Arc::new(ConnectionRegistry::new(Arc::clone(&radio))),
            radio,
        };
        Arc::new(Self {
            ctx: Arc::new(ctx),
            sessions: Arc::new(SessionRegistry::new()),
            lanes: DeviceLanes::new(settings.lane_idle()),
            limits: Limits::from(settings),
            request_timeout: settings.request_timeout(),
            cancel: CancellationToken::new(),
        })
    }

    /// Start draining adapter callbacks. Stops on [`shutdown`](Self::shutdown).
    pub fn spawn_event_pump(&self, events: AdapterEventReceiver) -> JoinHandle<()> {
        let broadcaster = EventBroadcaster::new(
            Arc::clone(&self.ctx.radio),
            Arc::clone(&self.ctx.scan),
            Arc::clone(&self.ctx.devices),
            Arc::clone(&self.sessions),
        );
        tokio::spawn(broadcaster.run(events, self.cancel.child_token()))
    }

    /// Connected client sessions.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Register a newly connected client.
    pub async fn open_session(&self, session: Arc<ClientSession>) {
        info!(client_id = %session.id, "client session opened");
        self.sessions.add(session).await;
    }

    /// Forget a client: cancel its pending commands, stop a continuous scan
    /// it owns and drop its interest in every link.
    pub async fn close_session(&self, client_id: &str) {
        let Some(session) = self.sessions.remove(client_id).await else {
            return;
        };
        session.close();
        let _ = self.ctx.scan.release_client(client_id).await;
        for address in self.ctx.devices.release_client(client_id) {
            let devices = Arc::clone(&self.ctx.devices);
            let lane = address.clone();
            self.lanes
                .submit(&lane, async move { devices.tidy(&address).await }.boxed());
        }
        info!(client_id, pending = session.pending_count(), "client session closed");
    }

    /// Handle one inbound text frame from `session`.
    pub async fn handle_text(self: &Arc<Self>, session: &Arc<ClientSession>, text: &str) {
        let message = match protocol::decode(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(client_id = %session.id, uid = ?err.uid, error = %err.error, "undecodable frame");
                counter!("ble_command_errors_total", "type" => "INPUT_ERROR", "code" => err.error.code())
                    .increment(1);
                reply(session, &Response::from(err)).await;
                return;
            }
        };
        let uid = message.uid;
        let msg_type = message.msg_type;

        if !session.try_reserve(uid) {
            let err = BridgeError::validation(format!("uid {uid} is already in use by a pending command"));
            counter!("ble_command_errors_total", "type" => msg_type.name(), "code" => err.code()).increment(1);
            reply(session, &Response::failure(uid, &err)).await;
            return;
        }

        let command = match Command::parse(msg_type, &message.args, &self.limits) {
            Ok(command) => command,
            Err(err) => {
                counter!("ble_command_errors_total", "type" => msg_type.name(), "code" => err.code()).increment(1);
                session.release(uid);
                reply(session, &Response::failure(uid, &err)).await;
                return;
            }
        };

        let span = info_span!("command", client_id = %session.id, uid, command = %msg_type);
        let job = Arc::clone(self)
            .run_command(Arc::clone(session), uid, command.clone())
            .instrument(span);
        match command.lane() {
            None => {
                let _handle = tokio::spawn(job);
            }
            Some(address) => {
                if matches!(command, Command::Disconnect { .. }) {
                    self.ctx.devices.cancel_link(address);
                }
                self.lanes.submit(address, job.boxed());
            }
        }
    }

    async fn run_command(self: Arc<Self>, session: Arc<ClientSession>, uid: i64, command: Command) {
        let msg_type = command.message_type();
        counter!("ble_commands_total", "type" => msg_type.name()).increment(1);
        let own_timeout = command.timeout();
        let ceiling = own_timeout.map_or(self.request_timeout, |t| self.request_timeout.max(t + TIMEOUT_GRACE));

        let start = Instant::now();
        let outlives_client = command.outlives_client();
        let address = command.lane().map(str::to_owned);
        let work = AssertUnwindSafe(handlers::execute(&self.ctx, &session.id, command)).catch_unwind();
        let work = async move {
            match tokio::time::timeout(ceiling, work).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_panic)) => {
                    error!("command handler panicked");
                    Err(BridgeError::internal(format!("{msg_type} failed unexpectedly")))
                }
                Err(_elapsed) => Err(BridgeError::timeout(format!(
                    "{msg_type} did not complete within {:.1}s",
                    ceiling.as_secs_f64()
                ))),
            }
        };
        let outcome = if outlives_client {
            Some(work.await)
        } else {
            tokio::select! {
                biased;
                () = session.closed() => None,
                outcome = work => Some(outcome),
            }
        };
        let duration = start.elapsed();
        histogram!("ble_command_duration_seconds", "type" => msg_type.name()).record(duration.as_secs_f64());

        let Some(outcome) = outcome else {
            counter!("ble_commands_cancelled_total").increment(1);
            session.release(uid);
            debug!("client closed; command cancelled");
            return;
        };

        if outlives_client && session.is_closed() {
            session.release(uid);
            if let (Ok(reply), Some(address)) = (&outcome, &address) {
                // a link opened for a departed client is abandoned at once
                if self.ctx.devices.leave(&session.id, address) {
                    self.ctx.devices.tidy(address).await;
                }
                for delivery in &reply.events {
                    let _ = self.sessions.send_event(&delivery.recipients, &delivery.event).await;
                }
            }
            debug!("client closed; link change completed without reply");
            return;
        }

        if duration > own_timeout.unwrap_or_default() + SLOW_COMMAND {
            warn!(duration_secs = duration.as_secs_f64(), "slow command");
        }

        let (response, events) = match outcome {
            Ok(Reply { result, events }) => (Response::success(uid, result), events),
            Err(err) => {
                counter!("ble_command_errors_total", "type" => msg_type.name(), "code" => err.code())
                    .increment(1);
                debug!(code = err.code(), error = %err, "command failed");
                (Response::failure(uid, &err), Vec::new())
            }
        };
        session.release(uid);
        reply(&session, &response).await;
        for delivery in events {
            let _ = self.sessions.send_event(&delivery.recipients, &delivery.event).await;
        }
    }

    /// Current state for health reporting.
    pub async fn status(&self) -> BridgeStatus {
        BridgeStatus {
            radio_available: self.ctx.radio.is_available(),
            scanning: self.ctx.scan.status().scanning,
            connected_devices: self.ctx.devices.connected_count(),
            clients: self.sessions.connection_count().await,
        }
    }

    /// Stop the event pump, close every session, stop scanning and
    /// disconnect every device.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for session in self.sessions.all().await {
            session.close();
        }
        self.ctx.scan.shutdown().await;
        self.ctx.devices.disconnect_all().await;
        info!("bridge shut down");
    }
}

async fn reply(session: &ClientSession, response: &Response) {
    match response.to_json() {
        Ok(json) => {
            if !session.deliver(Arc::new(json)).await {
                debug!(client_id = %session.id, "response not delivered: client gone");
            }
        }
        Err(e) => error!(client_id = %session.id, error = %e, "failed to serialize response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ble2ws_core::adapter::event_channel;
    use ble2ws_core::sim::{DEMO_SENSOR_ADDRESS, SimOp, SimulatedAdapter};
    use ble2ws_core::AdapterError;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    struct Harness {
        bridge: Arc<Bridge>,
        sim: Arc<SimulatedAdapter>,
    }

    fn harness(settings: BridgeSettings) -> Harness {
        let (tx, rx) = event_channel();
        let sim = Arc::new(SimulatedAdapter::demo(tx).with_advertise_interval(Duration::from_millis(20)));
        let bridge = Bridge::new(sim.clone(), &settings);
        let _pump = bridge.spawn_event_pump(rx);
        Harness { bridge, sim }
    }

    async fn client(bridge: &Bridge, id: &str) -> (Arc<ClientSession>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(64);
        let session = Arc::new(ClientSession::new(id.into(), tx));
        bridge.open_session(session.clone()).await;
        (session, rx)
    }

    async fn recv(rx: &mut mpsc::Receiver<Arc<String>>) -> Value {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("channel closed");
        serde_json::from_str(&msg).unwrap()
    }

    /// Next frame that is a response (has a `uid`).
    async fn recv_response(rx: &mut mpsc::Receiver<Arc<String>>) -> Value {
        loop {
            let msg = recv(rx).await;
            if msg.get("uid").is_some() {
                return msg;
            }
        }
    }

    #[tokio::test]
    async fn garbage_gets_input_error() {
        let h = harness(BridgeSettings::default());
        let (a, mut rx) = client(&h.bridge, "a").await;
        h.bridge.handle_text(&a, "{not json").await;
        let msg = recv(&mut rx).await;
        assert_eq!(msg["type"], -1);
        assert_eq!(msg["status"], "error");
        assert_eq!(msg["error"]["code"], "ProtocolError");
    }

    #[tokio::test]
    async fn unknown_type_is_correlated() {
        let h = harness(BridgeSettings::default());
        let (a, mut rx) = client(&h.bridge, "a").await;
        h.bridge.handle_text(&a, r#"{"type": 99, "uid": 4}"#).await;
        let msg = recv(&mut rx).await;
        assert_eq!(msg["uid"], 4);
        assert_eq!(msg["error"]["code"], "UnknownCommandError");
    }

    #[tokio::test]
    async fn scan_example_flow() {
        let h = harness(BridgeSettings::default());
        let (a, mut rx_a) = client(&h.bridge, "a").await;
        let (b, mut rx_b) = client(&h.bridge, "b").await;

        h.bridge.handle_text(&a, r#"{"type":1,"uid":1,"kwargs":{}}"#).await;
        assert_eq!(recv(&mut rx_a).await, json!({"uid": 1, "status": "ok"}));

        let event = recv(&mut rx_a).await;
        assert_eq!(event["type"], 20);
        assert!(event["payload"]["address"].is_string());

        h.bridge.handle_text(&b, r#"{"type":1,"uid":7,"kwargs":{}}"#).await;
        let busy = recv(&mut rx_b).await;
        assert_eq!(busy["uid"], 7);
        assert_eq!(busy["error"]["code"], "AdapterBusyError");

        h.bridge.handle_text(&a, r#"{"type":2,"uid":2,"kwargs":{}}"#).await;
        assert_eq!(recv_response(&mut rx_a).await, json!({"uid": 2, "status": "ok"}));
        assert!(!h.sim.is_scanning());
    }

    #[tokio::test]
    async fn duplicate_uid_rejected_while_pending() {
        let h = harness(BridgeSettings::default());
        let (a, mut rx) = client(&h.bridge, "a").await;
        h.bridge
            .handle_text(&a, r#"{"type":3,"uid":1,"timeout":0.3}"#)
            .await;
        h.bridge.handle_text(&a, r#"{"type":2,"uid":1}"#).await;

        let dup = recv_response(&mut rx).await;
        assert_eq!(dup["uid"], 1);
        assert_eq!(dup["error"]["code"], "ValidationError");

        let discovered = recv_response(&mut rx).await;
        assert_eq!(discovered["status"], "ok");
        assert_eq!(discovered["result"].as_array().unwrap().len(), 2);
        assert_eq!(a.pending_count(), 0);
    }

    #[tokio::test]
    async fn same_address_commands_run_in_order() {
        let h = harness(BridgeSettings::default());
        let (a, mut rx) = client(&h.bridge, "a").await;
        h.sim.set_latency(Duration::from_millis(20));
        let addr = DEMO_SENSOR_ADDRESS;
        let frames = [
            json!({"type": 6, "uid": 1, "address": addr}),
            json!({"type": 11, "uid": 2, "address": addr}),
            json!({"type": 12, "uid": 3, "address": addr}),
            json!({"type": 15, "uid": 4, "address": addr, "characteristic": "2a39", "value": "07"}),
            json!({"type": 14, "uid": 5, "address": addr, "characteristic": "2a39"}),
        ];
        for frame in &frames {
            h.bridge.handle_text(&a, &frame.to_string()).await;
        }
        let mut uids = Vec::new();
        for _ in 0..frames.len() {
            let msg = recv_response(&mut rx).await;
            uids.push(msg["uid"].as_i64().unwrap());
            if msg["uid"] == 5 {
                // 0x2a39 is write-only in the demo profile
                assert_eq!(msg["error"]["code"], "ValidationError");
            } else {
                assert_eq!(msg["status"], "ok", "{msg}");
            }
        }
        assert_eq!(uids, vec![1, 2, 3, 4, 5]);
        assert_eq!(h.sim.writes()[0].value, vec![7]);
    }

    #[tokio::test]
    async fn connect_reply_precedes_event() {
        let h = harness(BridgeSettings::default());
        let (a, mut rx) = client(&h.bridge, "a").await;
        let frame = json!({"type": 6, "uid": 9, "kwargs": {"address": DEMO_SENSOR_ADDRESS.to_lowercase()}});
        h.bridge.handle_text(&a, &frame.to_string()).await;
        let response = recv(&mut rx).await;
        assert_eq!(response["uid"], 9);
        assert_eq!(response["result"]["address"], DEMO_SENSOR_ADDRESS);
        let event = recv(&mut rx).await;
        assert_eq!(event["type"], 21);
        assert_eq!(event["payload"], response["result"]);
    }

    #[tokio::test]
    async fn request_ceiling_yields_timeout_error() {
        let settings = BridgeSettings {
            request_timeout_ms: 50,
            ..BridgeSettings::default()
        };
        let h = harness(settings);
        h.sim.set_latency(Duration::from_secs(2));
        let (a, mut rx) = client(&h.bridge, "a").await;
        let frame = json!({"type": 8, "uid": 3, "address": DEMO_SENSOR_ADDRESS});
        h.bridge.handle_text(&a, &frame.to_string()).await;
        let msg = recv(&mut rx).await;
        assert_eq!(msg["uid"], 3);
        assert_eq!(msg["error"]["code"], "TimeoutError");
    }

    #[tokio::test]
    async fn closing_client_cancels_only_its_commands() {
        let h = harness(BridgeSettings::default());
        let (a, mut rx_a) = client(&h.bridge, "a").await;
        let (b, mut rx_b) = client(&h.bridge, "b").await;
        let addr = DEMO_SENSOR_ADDRESS;

        h.bridge
            .handle_text(&b, &json!({"type": 6, "uid": 1, "address": addr}).to_string())
            .await;
        assert_eq!(recv_response(&mut rx_b).await["status"], "ok");

        h.sim.set_latency(Duration::from_millis(300));
        h.bridge
            .handle_text(&a, &json!({"type": 11, "uid": 1, "address": addr}).to_string())
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.bridge.close_session("a").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.pending_count(), 0);

        h.bridge
            .handle_text(&b, &json!({"type": 10, "uid": 2, "address": addr}).to_string())
            .await;
        let services = recv_response(&mut rx_b).await;
        assert_eq!(services["status"], "ok");
        assert_eq!(services["result"]["address"], addr);
        assert!(h.sim.is_connected(addr));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_completes_after_issuer_leaves() {
        let h = harness(BridgeSettings::default());
        let (a, _rx_a) = client(&h.bridge, "a").await;
        let (b, mut rx_b) = client(&h.bridge, "b").await;
        let addr = DEMO_SENSOR_ADDRESS;

        h.bridge
            .handle_text(&b, &json!({"type": 6, "uid": 1, "address": addr}).to_string())
            .await;
        assert_eq!(recv_response(&mut rx_b).await["status"], "ok");

        h.sim.set_latency(Duration::from_millis(200));
        h.bridge
            .handle_text(&b, &json!({"type": 11, "uid": 2, "address": addr}).to_string())
            .await;
        h.bridge
            .handle_text(&a, &json!({"type": 7, "uid": 1, "address": addr}).to_string())
            .await;
        h.bridge.close_session("a").await;

        let discovery = recv_response(&mut rx_b).await;
        assert_eq!(discovery["uid"], 2);
        assert_eq!(discovery["error"]["code"], "ConnectionError");
        let event = recv(&mut rx_b).await;
        assert_eq!(event["type"], 22);
        assert_eq!(event["payload"]["reason"], "requested");
        assert!(!h.bridge.ctx.devices.is_connected(addr));
        assert!(!h.sim.is_connected(addr));
        assert_eq!(a.pending_count(), 0);

        h.sim.set_latency(Duration::ZERO);
        h.bridge
            .handle_text(&b, &json!({"type": 6, "uid": 3, "address": addr}).to_string())
            .await;
        let reconnect = recv_response(&mut rx_b).await;
        assert_eq!(reconnect["result"]["already_connected"], false);
        h.bridge
            .handle_text(&b, &json!({"type": 11, "uid": 4, "address": addr}).to_string())
            .await;
        assert_eq!(recv_response(&mut rx_b).await["status"], "ok");
    }

    #[tokio::test]
    async fn connect_for_departed_client_is_torn_down() {
        let h = harness(BridgeSettings::default());
        let (a, mut rx_a) = client(&h.bridge, "a").await;
        let addr = DEMO_SENSOR_ADDRESS;

        h.sim.set_latency(Duration::from_millis(100));
        h.bridge
            .handle_text(&a, &json!({"type": 6, "uid": 1, "address": addr}).to_string())
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.bridge.close_session("a").await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.sim.links_opened(), 1);
        assert!(!h.sim.is_connected(addr));
        assert!(!h.bridge.ctx.devices.is_connected(addr));
        assert_eq!(a.pending_count(), 0);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn unavailable_radio_reported_to_every_client() {
        let h = harness(BridgeSettings::default());
        let (a, mut rx_a) = client(&h.bridge, "a").await;
        let (b, mut rx_b) = client(&h.bridge, "b").await;
        h.sim.fail_next(SimOp::StartScan, AdapterError::Unavailable("powered off".into()));
        h.sim.fail_next(SimOp::Probe, AdapterError::Unavailable("powered off".into()));

        h.bridge.handle_text(&a, r#"{"type":1,"uid":1}"#).await;
        assert_eq!(recv(&mut rx_a).await["error"]["code"], "AdapterUnavailableError");
        h.bridge.handle_text(&b, r#"{"type":1,"uid":1}"#).await;
        assert_eq!(recv(&mut rx_b).await["error"]["code"], "AdapterUnavailableError");

        h.bridge.handle_text(&b, r#"{"type":1,"uid":2}"#).await;
        assert_eq!(recv(&mut rx_b).await["status"], "ok");
        assert!(h.bridge.status().await.radio_available);
    }

    #[tokio::test]
    async fn shutdown_releases_radio() {
        let h = harness(BridgeSettings::default());
        let (a, mut rx) = client(&h.bridge, "a").await;
        h.bridge.handle_text(&a, r#"{"type":1,"uid":1}"#).await;
        let _ = recv(&mut rx).await;
        h.bridge.shutdown().await;
        assert!(!h.sim.is_scanning());
        assert!(a.is_closed());
    }
}
