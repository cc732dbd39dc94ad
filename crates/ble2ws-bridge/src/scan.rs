//! Adapter session manager: the single scan session and the discovery cache.
//!
//! At most one scan runs process-wide. A continuous scan (START_SCAN) lives
//! until its owner stops it or disconnects. Bounded scans (DISCOVER, FIND_*)
//! run in a detached task so they always release the radio at expiry, even
//! when the requesting client has gone away.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ble2ws_core::peripheral::{PeripheralRecord, Sighting};
use ble2ws_core::{BridgeError, ScanFilter};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::radio::Radio;

/// How a scan session ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanKind {
    /// START_SCAN; ends on STOP_SCAN or owner disconnect.
    Continuous,
    /// DISCOVER / FIND_*; ends at its deadline or first match.
    Bounded,
}

/// Predicate of a FIND_* scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FindTarget {
    /// Exact advertised or local name.
    Name(String),
    /// Address, compared case-insensitively.
    Address(String),
}

impl FindTarget {
    fn matches(&self, record: &PeripheralRecord) -> bool {
        match self {
            Self::Name(name) => {
                record.name.as_deref() == Some(name.as_str())
                    || record.advertisement.local_name.as_deref() == Some(name.as_str())
            }
            Self::Address(address) => record.address.eq_ignore_ascii_case(address),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Name(name) => format!("no device named '{name}' found"),
            Self::Address(address) => format!("device {address} not found"),
        }
    }
}

/// A sighting accepted into the cache.
#[derive(Clone, Debug)]
pub struct Sighted {
    /// The refreshed cache entry.
    pub record: PeripheralRecord,
    /// Client that owns the running scan.
    pub owner: String,
}

/// Snapshot for health reporting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanStatus {
    /// Whether a scan session is active.
    pub scanning: bool,
    /// Kind of the active session.
    pub kind: Option<ScanKind>,
    /// Cached peripherals.
    pub cached: usize,
}

struct ScanSession {
    id: u64,
    kind: ScanKind,
    owner: String,
    filter: Vec<Uuid>,
    ended: CancellationToken,
}

#[derive(Default)]
struct ScanState {
    session: Option<ScanSession>,
    peripherals: HashMap<String, PeripheralRecord>,
}

/// Owner of the radio's scan lifecycle and the discovery cache.
pub struct ScanManager {
    radio: Arc<Radio>,
    /// Serialises session start and stop.
    lock: tokio::sync::Mutex<()>,
    state: Mutex<ScanState>,
    next_id: AtomicU64,
    sightings: broadcast::Sender<PeripheralRecord>,
    cache_ttl: Duration,
}

impl ScanManager {
    /// Create a manager over `radio`.
    pub fn new(radio: Arc<Radio>, cache_ttl: Duration) -> Self {
        let (sightings, _) = broadcast::channel(256);
        Self {
            radio,
            lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(ScanState::default()),
            next_id: AtomicU64::new(1),
            sightings,
            cache_ttl,
        }
    }

    /// Begin a continuous scan owned by `owner`.
    pub async fn start_scan(&self, owner: &str, service_uuids: Vec<Uuid>) -> Result<(), BridgeError> {
        let _guard = self.lock.lock().await;
        let _ = self.begin(owner, ScanKind::Continuous, service_uuids).await?;
        info!(owner, "continuous scan started");
        Ok(())
    }

    /// Stop the continuous scan. Idle is success; a bounded scan or one
    /// owned by another client is `AdapterBusyError`.
    pub async fn stop_scan(&self, requester: &str) -> Result<(), BridgeError> {
        let _guard = self.lock.lock().await;
        let id = {
            let state = self.state.lock();
            match &state.session {
                None => return Ok(()),
                Some(s) if s.kind == ScanKind::Bounded => {
                    return Err(BridgeError::busy(
                        "a bounded scan is running and stops at its deadline",
                    ));
                }
                Some(s) if s.owner != requester => {
                    return Err(BridgeError::busy("the active scan belongs to another client"));
                }
                Some(s) => s.id,
            }
        };
        let _ = self.close_session(Some(id));
        info!(owner = requester, "continuous scan stopped");
        self.radio.call(self.radio.adapter().stop_scan()).await
    }

    /// Scan for `timeout` and return every peripheral seen before expiry,
    /// sorted by address.
    pub async fn discover(
        self: &Arc<Self>,
        owner: &str,
        timeout: Duration,
        service_uuids: Vec<Uuid>,
    ) -> Result<Vec<PeripheralRecord>, BridgeError> {
        let (id, ended) = {
            let _guard = self.lock.lock().await;
            self.begin(owner, ScanKind::Bounded, service_uuids).await?
        };
        debug!(owner, ?timeout, "bounded discovery started");

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let interrupted = tokio::select! {
                () = tokio::time::sleep(timeout) => false,
                () = ended.cancelled() => true,
            };
            let snapshot = this.finish(id).await;
            if interrupted {
                Err(BridgeError::unavailable("scan interrupted: bluetooth radio unavailable"))
            } else {
                Ok(snapshot)
            }
        });
        task.await
            .map_err(|e| BridgeError::internal(format!("discovery task failed: {e}")))?
    }

    /// Scan until a peripheral matches `target` or `timeout` expires.
    pub async fn find(
        self: &Arc<Self>,
        owner: &str,
        timeout: Duration,
        target: FindTarget,
    ) -> Result<PeripheralRecord, BridgeError> {
        let mut sightings = self.sightings.subscribe();
        let (id, ended) = {
            let _guard = self.lock.lock().await;
            self.begin(owner, ScanKind::Bounded, Vec::new()).await?
        };
        debug!(owner, ?target, ?timeout, "find started");

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let search = async {
                loop {
                    match sightings.recv().await {
                        Ok(record) if target.matches(&record) => return Some(record),
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            };
            let outcome = tokio::select! {
                found = tokio::time::timeout(timeout, search) => Ok(found.ok().flatten()),
                () = ended.cancelled() => Err(()),
            };
            let _ = this.finish(id).await;
            match outcome {
                Ok(Some(record)) => Ok(record),
                Ok(None) => Err(BridgeError::not_found(target.describe())),
                Err(()) => Err(BridgeError::unavailable(
                    "scan interrupted: bluetooth radio unavailable",
                )),
            }
        });
        task.await
            .map_err(|e| BridgeError::internal(format!("find task failed: {e}")))?
    }

    /// Fold an advertisement into the cache if a session is active and its
    /// filter passes.
    pub fn record_sighting(&self, sighting: Sighting) -> Option<Sighted> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let session = state.session.as_ref()?;
        if !sighting.matches_services(&session.filter) {
            return None;
        }
        let owner = session.owner.clone();

        let ttl = self.cache_ttl;
        state.peripherals.retain(|_, r| !r.is_expired(ttl));
        let record = match state.peripherals.get_mut(&sighting.address) {
            Some(existing) => {
                existing.refresh(sighting);
                existing.clone()
            }
            None => {
                let record = PeripheralRecord::from_sighting(sighting);
                let _ = state.peripherals.insert(record.address.clone(), record.clone());
                record
            }
        };
        let _ = self.sightings.send(record.clone());
        Some(Sighted { record, owner })
    }

    /// Stop a continuous scan owned by a departing client.
    pub async fn release_client(&self, client_id: &str) -> bool {
        let _guard = self.lock.lock().await;
        let id = {
            let state = self.state.lock();
            match &state.session {
                Some(s) if s.kind == ScanKind::Continuous && s.owner == client_id => s.id,
                _ => return false,
            }
        };
        let _ = self.close_session(Some(id));
        if let Err(e) = self.radio.call(self.radio.adapter().stop_scan()).await {
            warn!(client_id, error = %e, "failed to stop scan of departed client");
        }
        info!(client_id, "scan stopped after owner disconnected");
        true
    }

    /// The radio went away: end whatever session is active.
    pub fn radio_lost(&self) {
        if self.close_session(None).0 {
            warn!("scan session ended: bluetooth radio unavailable");
        }
    }

    /// End any session and stop the radio scanning.
    pub async fn shutdown(&self) {
        let _guard = self.lock.lock().await;
        if self.close_session(None).0 {
            if let Err(e) = self.radio.adapter().stop_scan().await {
                warn!(error = %e, "failed to stop scan during shutdown");
            }
        }
    }

    /// Cached record for `address`, if still fresh.
    pub fn cached(&self, address: &str) -> Option<PeripheralRecord> {
        self.state
            .lock()
            .peripherals
            .get(address)
            .filter(|r| !r.is_expired(self.cache_ttl))
            .cloned()
    }

    /// Current state.
    pub fn status(&self) -> ScanStatus {
        let state = self.state.lock();
        ScanStatus {
            scanning: state.session.is_some(),
            kind: state.session.as_ref().map(|s| s.kind),
            cached: state.peripherals.len(),
        }
    }

    /// Create a session and start the radio. Caller holds `lock`.
    async fn begin(
        &self,
        owner: &str,
        kind: ScanKind,
        filter: Vec<Uuid>,
    ) -> Result<(u64, CancellationToken), BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ended = CancellationToken::new();
        {
            let mut state = self.state.lock();
            if state.session.is_some() {
                return Err(BridgeError::busy("a scan is already in progress"));
            }
            state.peripherals.clear();
            state.session = Some(ScanSession {
                id,
                kind,
                owner: owner.to_owned(),
                filter: filter.clone(),
                ended: ended.clone(),
            });
        }

        let started = self
            .radio
            .call(self.radio.adapter().start_scan(&ScanFilter {
                service_uuids: filter,
            }))
            .await;
        if let Err(e) = started {
            let _ = self.close_session(Some(id));
            return Err(e);
        }
        Ok((id, ended))
    }

    /// End session `id` and stop the radio; returns the fresh cache snapshot.
    async fn finish(&self, id: u64) -> Vec<PeripheralRecord> {
        let _guard = self.lock.lock().await;
        let (was_active, snapshot) = self.close_session(Some(id));
        if was_active {
            if let Err(e) = self.radio.call(self.radio.adapter().stop_scan()).await {
                warn!(error = %e, "failed to stop bounded scan");
            }
        }
        snapshot
    }

    /// Clear the session (only if it is `id`, when given) and snapshot the
    /// cache in the same critical section.
    fn close_session(&self, id: Option<u64>) -> (bool, Vec<PeripheralRecord>) {
        let mut state = self.state.lock();
        let matches = match (&state.session, id) {
            (Some(s), Some(id)) => s.id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            if let Some(session) = state.session.take() {
                session.ended.cancel();
            }
        }
        let mut snapshot: Vec<PeripheralRecord> = state
            .peripherals
            .values()
            .filter(|r| !r.is_expired(self.cache_ttl))
            .cloned()
            .collect();
        snapshot.sort_by(|a, b| a.address.cmp(&b.address));
        (matches, snapshot)
    }
}
