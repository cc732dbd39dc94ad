//! Per-client session state.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Dropped events after which a client is disconnected.
pub const MAX_EVENT_DROPS: u64 = 100;

/// One connected WebSocket client.
///
/// Holds the outbound queue, the set of uids whose response is still owed,
/// and a cancellation token that ends the connection and every command the
/// client has in flight.
pub struct ClientSession {
    /// Unique client id (`client_<uuid>`).
    pub id: String,
    tx: mpsc::Sender<Arc<String>>,
    pending: Mutex<HashSet<i64>>,
    cancel: CancellationToken,
    /// When the client connected.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_events: AtomicU64,
}

impl ClientSession {
    /// Create a session writing to `tx`.
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            pending: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_events: AtomicU64::new(0),
        }
    }

    // ── uid bookkeeping ─────────────────────────────────────────────

    /// Claim `uid` for a new command. `false` if it is still outstanding.
    pub fn try_reserve(&self, uid: i64) -> bool {
        self.pending.lock().insert(uid)
    }

    /// Release `uid` once its response has been produced.
    pub fn release(&self, uid: i64) {
        let _ = self.pending.lock().remove(&uid);
    }

    /// Commands awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Queue a response, waiting for room. `false` once the session is closed.
    pub async fn deliver(&self, message: Arc<String>) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.tx.send(message) => sent.is_ok(),
        }
    }

    /// Queue an event without waiting. A full queue drops the event and
    /// counts it; returns `false` in that case or when the queue is closed.
    pub fn offer(&self, message: Arc<String>) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_events.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Events dropped because the client could not keep up.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Whether the client has dropped more events than tolerated.
    pub fn over_drop_limit(&self) -> bool {
        self.dropped_events() > MAX_EVENT_DROPS
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// End the session and everything it has in flight.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the session is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Token cancelled when the session closes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ── Liveness ────────────────────────────────────────────────────

    /// Record a pong (or any inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last pong or connection start.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }
}
