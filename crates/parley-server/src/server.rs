//! `ChatServer`: Axum HTTP + WebSocket listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, Json, Response};
use axum::routing::get;
use axum::Router;
use parley_core::ClientId;
use parley_store::MessageStore;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::page::DEMO_PAGE;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{self, SessionContext};

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionContext,
    pub start_time: Instant,
    pub max_message_size: usize,
}

/// The chat server: one registry and one store shared by all sessions.
pub struct ChatServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
    shutdown: Arc<ShutdownCoordinator>,
    open_transports: Arc<AtomicUsize>,
    start_time: Instant,
}

impl ChatServer {
    pub fn new(config: ServerConfig, store: Arc<dyn MessageStore>) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            store,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            open_transports: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            max_send_queue: self.config.max_send_queue,
            heartbeat_interval: Duration::from_secs(self.config.heartbeat_interval_secs.max(1)),
            shutdown: self.shutdown.token(),
            open_transports: Arc::clone(&self.open_transports),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            session: self.session_context(),
            start_time: self.start_time,
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/", get(index_handler))
            .route("/ws/{client_id}", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });

        info!(%addr, "parley server listening");
        Ok((addr, handle))
    }

    /// Stop accepting connections and close every open session.
    pub fn shutdown_now(&self) -> usize {
        self.shutdown.shutdown();
        self.registry.close_all()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// WebSocket sockets still held open by a session writer.
    pub fn open_transports(&self) -> usize {
        self.open_transports.load(Ordering::Acquire)
    }
}

/// GET /
async fn index_handler() -> Html<&'static str> {
    Html(DEMO_PAGE)
}

/// GET /ws/{client_id}: upgrade and hand the socket to a new session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<i64>,
    State(state): State<AppState>,
) -> Response {
    let ctx = state.session;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| session::run_session(socket, ClientId(client_id), ctx))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let messages = state.session.store.count().await.ok();
    let resp = health::health_check(
        state.start_time,
        state.session.registry.len(),
        state.session.open_transports.load(Ordering::Acquire),
        messages,
    );
    let status = if resp.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp))
}
