//! Per-device FIFO execution lanes.
//!
//! Every address-scoped command is queued on the lane for its address and
//! run one at a time in submission order. Lanes for different addresses run
//! concurrently. A lane's worker exits after sitting idle; the next
//! submission starts a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A queued unit of work.
pub type Job = BoxFuture<'static, ()>;

type LaneMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>>;

/// Lane scheduler keyed by device address.
pub struct DeviceLanes {
    lanes: LaneMap,
    idle: Duration,
}

impl DeviceLanes {
    /// Create a scheduler whose workers exit after `idle` without work.
    pub fn new(idle: Duration) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            idle,
        }
    }

    /// Append `job` to the lane for `address`.
    pub fn submit(&self, address: &str, job: Job) {
        let mut lanes = self.lanes.lock();
        let job = match lanes.get(address) {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(job);
        let _ = lanes.insert(address.to_owned(), tx);
        debug!(address, "lane started");
        let _handle = tokio::spawn(run_lane(
            address.to_owned(),
            rx,
            Arc::clone(&self.lanes),
            self.idle,
        ));
    }

    /// Lanes with a live worker.
    pub fn active(&self) -> usize {
        self.lanes.lock().len()
    }
}

async fn run_lane(
    address: String,
    mut rx: mpsc::UnboundedReceiver<Job>,
    lanes: LaneMap,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(job)) => job.await,
            Ok(None) => break,
            Err(_elapsed) => {
                // Submissions hold the map lock, so nothing can slip in
                // between the final check and removal.
                let job = {
                    let mut map = lanes.lock();
                    match rx.try_recv() {
                        Ok(job) => Some(job),
                        Err(_) => {
                            let _ = map.remove(&address);
                            None
                        }
                    }
                };
                match job {
                    Some(job) => job.await,
                    None => break,
                }
            }
        }
    }
    trace!(address, "lane stopped");
}
