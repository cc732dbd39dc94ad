//! `BridgeServer`: Axum HTTP + `WebSocket` server in front of a [`Bridge`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use ble2ws_bridge::Bridge;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionConfig, run_ws_session};

/// Shared state for Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The bridge every session talks to.
    pub bridge: Arc<Bridge>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// One permit per open `WebSocket` connection.
    pub connections: Arc<Semaphore>,
    /// Per-connection settings.
    pub session: SessionConfig,
    /// Max inbound message size.
    pub max_message_size: usize,
    /// Server start time.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The bridge's HTTP + `WebSocket` front end.
pub struct BridgeServer {
    config: ServerConfig,
    bridge: Arc<Bridge>,
    shutdown: Arc<ShutdownCoordinator>,
    connections: Arc<Semaphore>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl BridgeServer {
    /// Create a server in front of `bridge`.
    pub fn new(config: ServerConfig, bridge: Arc<Bridge>, metrics: Option<PrometheusHandle>) -> Self {
        let connections = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            bridge,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            connections,
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router.
    pub fn router(&self) -> Router {
        let state = AppState {
            bridge: self.bridge.clone(),
            shutdown: self.shutdown.clone(),
            connections: self.connections.clone(),
            session: SessionConfig::from(&self.config),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve in the background. Returns the bound address and the
    /// serve task, which ends once shutdown begins.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "ble2ws server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server stopped with error");
            }
        });
        Ok((addr, handle))
    }

    /// Stop accepting, close every session, stop scanning, disconnect every
    /// device, then wait up to `timeout` for tracked tasks.
    pub async fn shutdown_gracefully(&self, timeout: Option<Duration>) {
        info!("shutting down");
        self.shutdown.shutdown();
        self.bridge.shutdown().await;
        self.shutdown.graceful_shutdown(timeout).await;
    }

    /// The bridge.
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Upgrade to a `WebSocket` session, or 503 when shutting down or full.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        counter!(WS_REJECTED_TOTAL, "reason" => "shutdown").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let Ok(permit) = state.connections.clone().try_acquire_owned() else {
        counter!(WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!("connection limit reached, rejecting upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let client_id = format!("client_{}", Uuid::now_v7());
    let token = state.shutdown.token();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, client_id, state.bridge, state.session, token).await;
            drop(permit);
        })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.bridge.status().await;
    Json(health::health_check(state.start_time, &status))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
