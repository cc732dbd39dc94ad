//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before aborting tasks.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown across server tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for `handle` during [`graceful_shutdown`](Self::graceful_shutdown).
    pub fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Tasks tracked and still running.
    pub fn tracked(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Cancel the token, then wait up to `timeout` for every tracked task.
    /// Tasks still running after the timeout are aborted.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        info!(
            task_count = handles.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "waiting for tasks to complete"
        );
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, aborting remaining tasks");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_cancels_token() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_cooperative_tasks() {
        let coord = ShutdownCoordinator::new();
        let finished = Arc::new(AtomicBool::new(false));
        let token = coord.token();
        let flag = finished.clone();
        coord.track(tokio::spawn(async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        }));

        coord.graceful_shutdown(Some(Duration::from_secs(1))).await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(coord.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_is_aborted_after_timeout() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let abort = handle.abort_handle();
        coord.track(handle);

        coord.graceful_shutdown(Some(Duration::from_millis(50))).await;
        for _ in 0..10 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn finished_tasks_are_pruned_on_track() {
        let coord = ShutdownCoordinator::new();
        let done = tokio::spawn(async {});
        tokio::task::yield_now().await;
        while !done.is_finished() {
            tokio::task::yield_now().await;
        }
        coord.track(done);
        coord.track(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }));
        assert_eq!(coord.tracked(), 1);
        coord.graceful_shutdown(Some(Duration::from_millis(10))).await;
    }
}
