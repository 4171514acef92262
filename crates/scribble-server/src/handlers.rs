//! Connection handlers for the Scribble server.
//!
//! This module handles the connection lifecycle: the WebSocket upgrade, the
//! per-connection loop that drives a [`Session`], and the background reaper.

use crate::config::Config;
use crate::metrics;
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use scribble_core::{RoomRegistry, Session, SessionId};
use scribble_protocol::{error_code, Frame, PROTOCOL_VERSION};
use scribble_transport::{Connection, UpgradedConnection};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Live rooms.
    pub registry: Arc<RoomRegistry>,
    /// Server configuration.
    pub config: Config,
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            registry: Arc::new(RoomRegistry::with_config(config.registry_config())),
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Counts a connection for its lifetime.
struct ConnectionGuard {
    state: Arc<AppState>,
}

impl ConnectionGuard {
    /// Reserve a connection slot, or `None` at the limit.
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        metrics::record_connection();
        Some(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::AcqRel);
        metrics::record_disconnection();
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Scribble server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Serve on an already bound listener until the server fails.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let reaper = spawn_reaper(Arc::clone(&state));

    let app = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;

    reaper.abort();
    result.map_err(Into::into)
}

/// Periodically retract stale drafts and evict idle rooms.
fn spawn_reaper(state: Arc<AppState>) -> JoinHandle<()> {
    let period = Duration::from_millis(state.config.rooms.reap_interval_ms.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let report = state.registry.reap(Instant::now());
            metrics::record_reap(&report, &state.registry.stats());
        }
    })
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "rooms": state.registry.stats().room_count,
        "sessions": state.connection_count(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(guard) = ConnectionGuard::acquire(&state) else {
        warn!(remote = %addr, "Connection limit reached");
        metrics::record_rejected_connection();
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let conn = UpgradedConnection::new(socket, Some(addr), max_message_size);
            handle_connection(conn, state).await;
            drop(guard);
        })
        .into_response()
}

async fn send_frame<C: Connection>(conn: &mut C, frame: Frame) -> bool {
    metrics::record_outbound(&frame);
    match conn.send(frame).await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "Send failed");
            false
        }
    }
}

/// Drive one connection until either side goes away.
pub async fn handle_connection<C: Connection>(mut conn: C, state: Arc<AppState>) {
    let session_id = SessionId::generate();
    let mut session = Session::new(session_id.clone(), Arc::clone(&state.registry));

    debug!(session = %session_id, remote = ?conn.remote_addr(), "WebSocket connected");

    let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    let connected = Frame::connected(session_id.as_str(), PROTOCOL_VERSION.major, heartbeat);
    if !send_frame(&mut conn, connected).await {
        error!(session = %session_id, "Failed to send Connected frame");
        return;
    }

    let timeout = state.config.heartbeat.timeout();
    let period = Duration::from_millis(state.config.heartbeat.interval_ms.max(1));
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = session.next_event() => {
                let Some(frame) = event else { break };
                if !send_frame(&mut conn, frame).await {
                    break;
                }
            }

            inbound = conn.recv() => {
                match inbound {
                    Ok(Some(frame)) => {
                        let start = Instant::now();
                        metrics::record_inbound(&frame);

                        let mut delivered = true;
                        for reply in session.handle(frame) {
                            if !send_frame(&mut conn, reply).await {
                                delivered = false;
                                break;
                            }
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64());
                        if !delivered {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(session = %session_id, "WebSocket stream ended");
                        break;
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(session = %session_id, error = %e, "Dropped undecodable frame");
                        let reply = Frame::error(error_code::INVALID_FRAME, e.to_string());
                        if !send_frame(&mut conn, reply).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(session = %session_id, error = %e, "Transport error");
                        metrics::record_error("transport");
                        break;
                    }
                }
            }

            _ = heartbeat.tick(), if timeout.is_some() => {
                if timeout.is_some_and(|limit| conn.last_seen().elapsed() >= limit) {
                    debug!(session = %session_id, "Heartbeat timeout");
                    metrics::record_error("heartbeat_timeout");
                    break;
                }
                if let Err(e) = conn.ping().await {
                    debug!(session = %session_id, error = %e, "Ping failed");
                    break;
                }
            }
        }
    }

    session.close();
    if let Err(e) = conn.close().await {
        debug!(session = %session_id, error = %e, "Close failed");
    }

    debug!(session = %session_id, "WebSocket disconnected");
}
