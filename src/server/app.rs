//! HTTP surface: `/ws` upgrades and `/health`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, BrokerHandle};
use crate::config::BrokerConfig;
use crate::connection::{ClientRegistry, ConnectionHistory};
use crate::error::Result;
use crate::queue::device_fingerprint;

use super::auth::{is_authorized, presented_token};
use super::handler::RequestHandler;
use super::heartbeat::spawn_liveness_monitor;
use super::socket::{ConnectionContext, handle_socket, reject_unauthorized};

/// Per-client outbound buffer before sends start failing
const MAX_SEND_QUEUE: usize = 256;

/// How long shutdown waits for the HTTP server to drain
const SERVER_DRAIN_WAIT: Duration = Duration::from_secs(5);

/// Header carrying the client-declared device identity
const DEVICE_ID_HEADER: &str = "x-device-id";

/// Shared state of the axum handlers
#[derive(Clone)]
pub struct AppState {
    pub broker: BrokerHandle,
    pub registry: Arc<ClientRegistry>,
    pub history: Arc<Mutex<ConnectionHistory>>,
    pub handler: RequestHandler,
    pub auth_token: Option<Arc<str>>,
    pub heartbeat_interval: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(broker: BrokerHandle, registry: Arc<ClientRegistry>, config: &BrokerConfig) -> Self {
        Self {
            handler: RequestHandler::new(broker.clone(), Arc::clone(&registry)),
            broker,
            registry,
            history: Arc::new(Mutex::new(ConnectionHistory::new(config.reconnection_window))),
            auth_token: config.auth_token.as_deref().map(Arc::from),
            heartbeat_interval: config.heartbeat_interval,
        }
    }
}

/// Query parameters accepted on `/ws`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Build the router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = presented_token(params.token.as_deref(), &headers);
    if !is_authorized(state.auth_token.as_deref(), token.as_deref()) {
        log::warn!("Rejected WebSocket connection with a missing or invalid token");
        return ws.on_upgrade(reject_unauthorized);
    }

    let header_device = headers.get(DEVICE_ID_HEADER).and_then(|v| v.to_str().ok());
    let device_id = params.device_id.as_deref().or(header_device);
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
    let fingerprint = device_fingerprint(device_id, user_agent, &uuid::Uuid::new_v4().to_string());

    let ctx = ConnectionContext {
        registry: Arc::clone(&state.registry),
        history: Arc::clone(&state.history),
        handler: state.handler.clone(),
        heartbeat_interval: state.heartbeat_interval,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, ctx, fingerprint))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.broker.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            axum::Json(json!({
                "status": "healthy",
                "sessions": stats.sessions,
                "processes": stats.processes,
                "connections": stats.connections,
                "queued": stats.queued,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(json!({"status": "unavailable", "error": e.to_string()})),
        ),
    }
}

/// Running companion server
///
/// Keeps the broker loop, the HTTP server and the liveness monitor alive.
pub struct CompanionServer {
    local_addr: SocketAddr,
    broker: BrokerHandle,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    broker_task: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

impl CompanionServer {
    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for driving the broker in-process
    #[must_use]
    pub fn broker(&self) -> &BrokerHandle {
        &self.broker
    }

    /// Stop agents, flush state and close every connection
    pub async fn shutdown(self) {
        if let Err(e) = self.broker.shutdown().await {
            log::warn!("Broker was already stopped: {}", e);
        }
        self.shutdown.cancel();

        if let Err(e) = self.broker_task.await {
            log::error!("Broker task failed: {}", e);
        }
        let _ = self.monitor.await;
        if tokio::time::timeout(SERVER_DRAIN_WAIT, self.server).await.is_err() {
            log::warn!("HTTP server did not drain within {:?}", SERVER_DRAIN_WAIT);
        }
        log::info!("Companion server stopped");
    }
}

/// Restore state, start the broker and serve `/ws` and `/health`
///
/// # Errors
/// - `CompanionError::CliNotFound` when the agent executable is missing
/// - `CompanionError::Io` when the listener cannot bind
pub async fn start(config: BrokerConfig) -> Result<CompanionServer> {
    let registry = Arc::new(ClientRegistry::new(MAX_SEND_QUEUE));
    let (broker, broker_task) = Broker::spawn(&config, Arc::clone(&registry)).await?;

    let listener = tokio::net::TcpListener::bind((config.bind.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let monitor = spawn_liveness_monitor(
        Arc::clone(&registry),
        config.heartbeat_interval,
        config.client_timeout,
        shutdown.clone(),
    );

    let router = build_router(AppState::new(broker.clone(), registry, &config));
    let graceful = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(graceful.cancelled_owned())
            .await
        {
            log::error!("HTTP server error: {}", e);
        }
    });

    log::info!(
        "Companion server listening on {} (auth {})",
        local_addr,
        if config.auth_token.is_some() { "on" } else { "off" }
    );

    Ok(CompanionServer {
        local_addr,
        broker,
        shutdown,
        server,
        broker_task,
        monitor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_config(dir: &std::path::Path) -> BrokerConfig {
        BrokerConfig {
            data_dir: dir.to_path_buf(),
            cli_path: Some("/bin/sh".into()),
            ..BrokerConfig::default()
        }
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Arc::new(ClientRegistry::new(8));
        let (broker, task) = Broker::spawn(&config, Arc::clone(&registry)).await.unwrap();

        let router = build_router(AppState::new(broker.clone(), registry, &config));
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["sessions"], 0);
        assert_eq!(value["queued"], 0);

        broker.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn health_is_unavailable_without_broker() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Arc::new(ClientRegistry::new(8));
        let (broker, task) = Broker::spawn(&config, Arc::clone(&registry)).await.unwrap();
        broker.shutdown().await.unwrap();
        task.await.unwrap();

        let router = build_router(AppState::new(broker, registry, &config));
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn connect_params_use_camel_case() {
        let params: ConnectParams = serde_json::from_str(r#"{"token":"t","deviceId":"d"}"#).unwrap();
        assert_eq!(params.token.as_deref(), Some("t"));
        assert_eq!(params.device_id.as_deref(), Some("d"));
    }
}
