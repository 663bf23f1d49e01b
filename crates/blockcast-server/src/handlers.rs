//! HTTP and WebSocket handlers for the Blockcast server.
//!
//! Routes:
//! - `GET /ws/:project_id?user_id=<id>` joins a project over WebSocket
//! - `GET /health` reports hub state
//! - `POST /api/v1/projects/:project_id/events` publishes a message from
//!   the server side

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::session::{self, SessionConfig};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocket, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use blockcast_core::{validate_project_id, Hub, HubHandle, Message};
use blockcast_transport::websocket;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

static ANONYMOUS_USERS: AtomicU64 = AtomicU64::new(1);

/// Shared server state.
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Server configuration.
    pub config: Config,
    /// Settings handed to every session.
    pub session: SessionConfig,
}

impl AppState {
    /// Create new app state around a running hub.
    #[must_use]
    pub fn new(config: Config, hub: HubHandle) -> Self {
        Self {
            hub,
            session: SessionConfig::from(&config),
            config,
        }
    }
}

/// Query string of a WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    /// Identity stamped on every message from this connection.
    pub user_id: Option<String>,
}

/// Body of a server-side publish.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub data: Value,
}

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.websocket_route(), get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/projects/:project_id/events", post(publish_handler))
        .with_state(state)
}

/// Run the hub and the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let (hub, handle) = Hub::new(config.hub_config());
    tokio::spawn(hub.run());

    // Start metrics server if enabled
    let reporter = if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        Some(metrics::spawn_reporter(
            handle.stats().clone(),
            Duration::from_millis(config.metrics.report_interval_ms),
        ))
    } else {
        None
    };

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Blockcast server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}/<project_id>",
        addr, config.transport.websocket_path
    );

    let state = Arc::new(AppState::new(config, handle));
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    info!("Blockcast server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.hub.stats().snapshot();
    // `connections` keeps the field names existing dashboards poll for.
    let connections: Vec<_> = snapshot
        .projects
        .iter()
        .map(|p| json!({"projectId": p.project_id, "clientCount": p.client_count}))
        .collect();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": connections,
        "projects": snapshot.projects,
        "stats": {
            "clients": snapshot.clients,
            "broadcasts": snapshot.broadcasts,
            "frames_delivered": snapshot.frames_delivered,
            "evictions": snapshot.evictions,
            "encode_failures": snapshot.encode_failures,
        },
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Err(reason) = validate_project_id(&project_id) {
        debug!(reason, "Rejected WebSocket upgrade");
        return (StatusCode::BAD_REQUEST, reason).into_response();
    }

    let user_id = query
        .user_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(anonymous_user);

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, project_id, user_id))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, project_id: String, user_id: String) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    debug!(project = %project_id, user = %user_id, "WebSocket connected");

    let (sink, source) = websocket::split(socket, state.session.codec.encoding());
    let end = session::run(
        state.hub.clone(),
        state.session.clone(),
        project_id,
        user_id,
        source,
        sink,
    )
    .await;

    debug!(reason = %end, "WebSocket disconnected");
}

/// Server-side publish handler.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Response {
    if let Err(reason) = validate_project_id(&project_id) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response();
    }
    if request.kind.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Message type cannot be empty" })),
        )
            .into_response();
    }

    let message = Message::new(project_id, request.kind, request.user_id, request.data);
    match state.hub.broadcast_message(message).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response(),
        Err(e) => {
            warn!(error = %e, "Publish rejected");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn anonymous_user() -> String {
    format!("anon-{}", ANONYMOUS_USERS.fetch_add(1, Ordering::Relaxed))
}
