//! `NotificationServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::NotificationDispatcher;
use crate::errors::{ServerError, bind_error, connection_limit_response, shutting_down_response};
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::trigger::send_handler;
use crate::websocket::connection::ClientConnection;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Identity → connection registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out over the registry.
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// One permit per live session, `max_connections` in total.
    pub connection_slots: Arc<Semaphore>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The notification relay server.
pub struct NotificationServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    shutdown: Arc<ShutdownCoordinator>,
    connection_slots: Arc<Semaphore>,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl NotificationServer {
    /// Create a new server with an empty registry.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(Arc::clone(&registry)));
        let slots = config.max_connections.min(Semaphore::MAX_PERMITS);
        Self {
            config: Arc::new(config),
            registry,
            dispatcher,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            connection_slots: Arc::new(Semaphore::new(slots)),
            start_time: Instant::now(),
            metrics,
        }
    }

    fn state(&self) -> AppState {
        AppState {
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            connection_slots: Arc::clone(&self.connection_slots),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        }
    }

    /// Build the Axum router with all routes.
    ///
    /// A WebSocket upgrade is accepted on any path that is not `/send`,
    /// `/health` or `/metrics`. Other unknown requests get 404.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/send", post(send_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(upgrade_fallback)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let host = self.config.host.as_str();
        let port = self.config.port;
        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .map_err(|e| bind_error(host, port, e))?;
        let addr = listener.local_addr()?;
        info!(%addr, "notification server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
            info!("notification server stopped");
        });

        Ok((addr, handle))
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// A reserved session slot. Dropping it frees the slot and releases the
/// drain guard.
struct Admission {
    _slot: OwnedSemaphorePermit,
    _guard: TaskTrackerToken,
}

/// Reserve a slot for one more session, or the 503 explaining why not.
fn admit(state: &AppState) -> Result<Admission, Response> {
    if state.shutdown.is_shutting_down() {
        debug!("shutting down, refusing upgrade");
        counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => "shutdown").increment(1);
        return Err(shutting_down_response());
    }
    let Ok(slot) = Arc::clone(&state.connection_slots).try_acquire_owned() else {
        let limit = state.config.max_connections;
        warn!(limit, "connection limit reached, refusing upgrade");
        counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => "limit").increment(1);
        return Err(connection_limit_response(limit));
    };
    Ok(Admission {
        _slot: slot,
        _guard: state.shutdown.session_guard(),
    })
}

/// Admit the client and hand the socket to a session task.
fn upgrade(ws: WebSocketUpgrade, state: AppState) -> Response {
    let admission = match admit(&state) {
        Ok(admission) => admission,
        Err(refusal) => return refusal,
    };

    let (tx, rx) = mpsc::channel(state.config.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(ClientConnection::next_id(), tx));
    let shutdown = state.shutdown.token();

    // A failed handshake drops the closure, and the admission with it.
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _ = run_ws_session(
                socket,
                connection,
                rx,
                state.registry,
                state.config,
                shutdown,
            )
            .await;
            drop(admission);
        })
        .into_response()
}

/// GET / and GET /ws — WebSocket upgrade.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state)
}

/// Any other path: upgrade if the request asks for one, else 404.
async fn upgrade_fallback(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, state),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.identity_count(),
    ))
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}
