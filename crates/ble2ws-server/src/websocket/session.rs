//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use ble2ws_bridge::{Bridge, ClientSession};
use ble2ws_core::BridgeError;
use ble2ws_core::protocol::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_HEARTBEAT_TIMEOUTS_TOTAL,
};

/// Per-connection transport settings.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Ping and liveness check interval.
    pub heartbeat_interval: Duration,
    /// Close after this long without a Pong.
    pub heartbeat_timeout: Duration,
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            send_queue_capacity: config.send_queue_capacity.max(1),
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers a [`ClientSession`] with the bridge
/// 2. Feeds Text frames (and UTF-8 Binary frames) to the dispatcher
/// 3. Forwards queued responses and events, with periodic Ping frames
/// 4. Closes the client when the heartbeat monitor gives up on it
/// 5. Releases the client's scan and links on disconnect
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    client_id: String,
    bridge: Arc<Bridge>,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity);
    let session = Arc::new(ClientSession::new(client_id.clone(), send_tx));

    let connection_start = Instant::now();
    info!(client_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    bridge.open_session(session.clone()).await;

    let heartbeat_session = session.clone();
    let heartbeat = tokio::spawn(async move {
        let cancel = heartbeat_session.cancel_token();
        let result = run_heartbeat(
            heartbeat_session.clone(),
            config.heartbeat_interval,
            config.heartbeat_timeout,
            cancel,
        )
        .await;
        if result == HeartbeatResult::TimedOut {
            warn!(
                client_id = %heartbeat_session.id,
                silent_for = ?heartbeat_session.last_pong_elapsed(),
                "client unresponsive, disconnecting"
            );
            counter!(WS_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
            heartbeat_session.close();
        }
    });

    let outbound = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        session.cancel_token(),
        config.heartbeat_interval,
    ));

    loop {
        let frame = tokio::select! {
            () = session.closed() => break,
            () = shutdown.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(client_id, error = %e, "websocket read error");
                break;
            }
            None => break,
        };

        match msg {
            Message::Text(text) => {
                session.mark_alive();
                bridge.handle_text(&session, text.as_str()).await;
            }
            Message::Binary(data) => {
                session.mark_alive();
                if let Ok(text) = std::str::from_utf8(&data) {
                    bridge.handle_text(&session, text).await;
                } else {
                    info!(client_id, len = data.len(), "received non-UTF8 binary frame");
                    reject_binary(&session).await;
                }
            }
            Message::Close(_) => {
                info!(client_id, "client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => session.mark_alive(),
        }
    }

    // Clean up
    bridge.close_session(&client_id).await;
    session.close();
    heartbeat.abort();
    // The writer drains what is already queued, then sends Close.
    let _ = tokio::time::timeout(Duration::from_secs(1), outbound).await;

    info!(client_id, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

/// Forward the outbound queue and send Pings until `cancel` fires or the
/// socket fails.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    cancel: CancellationToken,
    ping_every: Duration,
) {
    let mut ping_interval = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                    return;
                }
            }
            () = cancel.cancelled() => break,
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
        }
    }

    while let Ok(text) = send_rx.try_recv() {
        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
            return;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.close().await;
}

/// INPUT_ERROR reply for a Binary frame that is not UTF-8.
async fn reject_binary(session: &ClientSession) {
    let error = BridgeError::protocol("binary frame is not valid UTF-8");
    if let Ok(json) = Response::input_error(&error).to_json() {
        let _ = session.deliver(Arc::new(json)).await;
    }
}
