//! Heartbeat ping/pong liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use ble2ws_bridge::ClientSession;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Watch a session's liveness.
///
/// At each `interval` tick the alive flag is checked and reset. Consecutive
/// silent ticks count as missed pongs; `timeout / interval` misses (at least
/// one) end the loop with [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(
    session: Arc<ClientSession>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    // The first tick completes immediately.
    let _ = check_interval.tick().await;
    let mut missed: u128 = 0;
    let max_missed = (timeout.as_millis() / interval.as_millis().max(1)).max(1);

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                // check_alive resets the flag until the next pong
                if session.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    fn make_session() -> Arc<ClientSession> {
        let (tx, _rx) = mpsc::channel(32);
        Arc::new(ClientSession::new("hb_client".into(), tx))
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let session = make_session();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(session, Duration::from_secs(100), Duration::from_secs(300), cancel2).await
        });

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_times_out() {
        let session = make_session();
        session.is_alive.store(false, Ordering::Relaxed);

        let result = run_heartbeat(
            session,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_needs_consecutive_misses() {
        let session = make_session();
        let watched = session.clone();
        let started = time::Instant::now();

        // interval 100ms, timeout 300ms: three silent ticks after the initial grace tick
        let result = run_heartbeat(
            watched,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn active_client_stays_alive() {
        let session = make_session();
        let watched = session.clone();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(watched, Duration::from_millis(50), Duration::from_millis(150), cancel2).await
        });

        for _ in 0..20 {
            time::sleep(Duration::from_millis(20)).await;
            session.mark_alive();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
