use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_core::RelayError;
use relay_telemetry::MetricsRecorder;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dispatcher::{Dispatcher, DEFAULT_COMMAND_TIMEOUT};
use crate::lifecycle::ConnectionLifecycle;
use crate::registry::SessionRegistry;
use crate::sink::SinkReader;
use crate::transport::{self, TransportConfig};

const EXEC_PREFIX: &str = "/Exec/";

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Per-session deadline for a dispatched command.
    pub command_timeout: Duration,
    /// How long a new client has to report its player name.
    pub handshake_timeout: Duration,
    /// Interval between pings sent to each client.
    pub heartbeat_interval: Duration,
    /// A client that sends nothing (pongs included) for this long is dropped.
    pub client_timeout: Duration,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            port: 8080,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            handshake_timeout: transport.handshake_timeout,
            heartbeat_interval: transport.heartbeat_interval,
            client_timeout: transport.client_timeout,
            max_send_queue: transport.max_send_queue,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<SessionRegistry>,
    pub lifecycle: ConnectionLifecycle,
    pub metrics: Arc<MetricsRecorder>,
    pub transport: TransportConfig,
}

impl AppState {
    pub fn new(config: &ServerConfig, metrics: Arc<MetricsRecorder>) -> Self {
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&metrics)));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            config.command_timeout,
            Arc::clone(&metrics),
        ));
        Self {
            dispatcher,
            lifecycle: ConnectionLifecycle::new(Arc::clone(&registry)),
            registry,
            metrics,
            transport: TransportConfig {
                max_send_queue: config.max_send_queue,
                handshake_timeout: config.handshake_timeout,
                heartbeat_interval: config.heartbeat_interval,
                client_timeout: config.client_timeout,
            },
        }
    }
}

/// HTTP-facing wrapper for [`RelayError`].
#[derive(Debug)]
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        tracing::debug!(kind = self.0.error_kind(), error = %self.0, "Request rejected");
        (status, self.0.to_string()).into_response()
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/Exec", post(exec_post))
        .route("/Exec/{*command}", get(exec_get))
        .route("/ws", get(ws_handler))
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(&config, metrics);
    let registry = Arc::clone(&state.registry);

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        port = local_addr.port(),
        timeout_ms = config.command_timeout.as_millis() as u64,
        "Command relay started"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
    }
}

/// `POST /Exec` with the raw command as body.
async fn exec_post(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    if body.is_empty() {
        return Err(RelayError::EmptyCommand.into());
    }
    let command = String::from_utf8_lossy(&body);
    Ok(stream_response(state.dispatcher.dispatch(&command)))
}

/// `GET /Exec/<cmd>` with a query-escaped command.
async fn exec_get(State(state): State<AppState>, uri: Uri) -> Result<Response, ApiError> {
    let raw = uri.path().strip_prefix(EXEC_PREFIX).unwrap_or_default();
    let command = unescape_command(raw)?;
    if command.is_empty() {
        return Err(RelayError::EmptyCommand.into());
    }
    Ok(stream_response(state.dispatcher.dispatch(&command)))
}

fn stream_response(reader: SinkReader) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        reader.into_body(),
    )
        .into_response()
}

/// Decode a query-escaped command: `+` is a space, `%XX` a byte.
pub fn unescape_command(raw: &str) -> Result<String, RelayError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(RelayError::MalformedCommand(raw.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(Cow::into_owned)
        .map_err(|_| RelayError::MalformedCommand(raw.to_string()))
}

/// WebSocket upgrade for game clients. Plain requests get 426.
async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| {
            transport::handle_ws_connection(socket, state.lifecycle, state.transport)
        }),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected non-upgrade request");
            (StatusCode::UPGRADE_REQUIRED, "Upgrade Required").into_response()
        }
    }
}

/// Liveness plus connected players and in-process metrics.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.registry.len(),
        "players": state.registry.names(),
        "metrics": state.metrics.snapshot(),
    }))
}
