//! HTTP handlers for the Switchboard server.
//!
//! `/ws` upgrades authenticated requests and hands the socket to the hub;
//! everything after the upgrade (reading, writing, liveness, teardown) is
//! owned by the hub's connection tasks.

use crate::config::Config;
use crate::dispatch::DefaultHandler;
use crate::identity;
use crate::metrics;
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{Hub, HubStats, MessageHandler};
use switchboard_transport::axum_ws::AxumSocket;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The connection hub.
    pub hub: Hub,
    /// Handler for every inbound envelope.
    pub handler: Arc<dyn MessageHandler>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with the default message handler.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Hub::new(config.connection_config());
        let handler: Arc<dyn MessageHandler> = Arc::new(DefaultHandler::new(hub.clone()));

        Self {
            hub,
            handler,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    let sampler = if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
        Some(metrics::spawn_sampler(
            state.hub.clone(),
            Duration::from_millis(config.metrics.sample_interval_ms),
        ))
    } else {
        None
    };

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Switchboard server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state, shutdown_signal()).await?;

    if let Some(sampler) = sampler {
        sampler.abort();
    }
    Ok(())
}

/// Serve on `listener` until `shutdown` resolves, then close every
/// connection.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(state.clone());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    info!("Server stopped, closing connections");
    state.hub.cleanup();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Statistics response.
#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: HubStats,
    users: usize,
    connections: usize,
}

/// Hub statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatsResponse {
        stats: state.hub.stats(),
        users: state.hub.active_users(),
        connections: state.hub.connection_count(),
    })
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(user) = identity::resolve_user(&headers, &query) else {
        debug!(remote = %remote, "Rejecting upgrade without user identity");
        metrics::record_error("unauthenticated");
        return (StatusCode::UNAUTHORIZED, "missing user identity").into_response();
    };

    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let socket = AxumSocket::new(socket, max_message_size).with_remote_addr(remote.to_string());
            let heartbeat = state.config.heartbeat.enabled;

            match state
                .hub
                .add(socket, user.clone(), heartbeat, state.handler.clone())
                .await
            {
                Ok(connection) => {
                    metrics::record_connection();
                    debug!(connection = %connection.id(), user = %user, "WebSocket connected");
                }
                Err(e) => {
                    warn!(user = %user, remote = %remote, error = %e, "Failed to register connection");
                    metrics::record_error("upgrade");
                }
            }
        })
}
