use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;
use signal_core::{Dispatcher, PeerConnector, RegistryConfig, SessionRegistry, SessionSnapshot};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::rtc::WebRtcConnector;
use crate::websocket::signal_handler;

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub registry: SessionRegistry,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        dispatcher: Dispatcher,
        registry: SessionRegistry,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            metrics,
        }
    }

    /// Starts a dispatcher and builds a registry over `connector`.
    pub fn with_connector(
        connector: Arc<dyn PeerConnector>,
        config: RegistryConfig,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let dispatcher = Dispatcher::new();
        dispatcher.start();
        let registry = SessionRegistry::new(dispatcher.clone(), connector, config);
        Self::new(dispatcher, registry, metrics)
    }

    fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }
}

#[derive(Debug, Serialize)]
struct SessionsResponse {
    active_sessions: usize,
    sessions: Vec<SessionSnapshot>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/signal", get(signal_handler))
        .route("/healthz", get(health_handler))
        .route("/debug/sessions", get(sessions_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `state` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server shutdown with error")
}

/// Runs the relay process until Ctrl-C, then tears every session down.
pub async fn run(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Result<()> {
    let connector = WebRtcConnector::new(&config.ice_servers, tokio::runtime::Handle::current())?;
    let state = Arc::new(AppState::with_connector(
        Arc::new(connector),
        RegistryConfig {
            max_sessions: config.max_sessions,
        },
        metrics,
    ));

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!(listen_addr = %config.listen_addr, "signal relay listening");

    serve(listener, state.clone(), shutdown_signal()).await?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        active_sessions = state.registry.len(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;

    state.registry.close_all();
    let dispatcher = state.dispatcher.clone();
    if let Err(err) = tokio::task::spawn_blocking(move || dispatcher.shutdown()).await {
        error!(error = %err, "dispatcher shutdown task failed");
    }
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn sessions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.registry.snapshot();
    Json(SessionsResponse {
        active_sessions: sessions.len(),
        sessions,
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.render_metrics() {
        Some(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
