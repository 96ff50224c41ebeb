//! HikeHub session gateway
//!
//! Local HTTP service that:
//! 1. Owns one organizer session (access token + refresh cookie)
//! 2. Forwards every other request to the HikeHub API with the bearer token
//! 3. Renews expired tokens once, behind the scenes, for all callers at once

mod config;
mod metrics;
mod proxy;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use clap::Parser;
use hikehub_client::{ApiClient, build_http_client};
use hikehub_session::{FileStorage, MemoryStorage, SessionEnded, SessionStorage};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, StorageKind};
use crate::proxy::{GatewayStats, client_error_response, error_response};

/// Time allowed for in-flight requests after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "hikehub-gateway")]
#[command(about = "Authenticated gateway to the HikeHub API", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    client: ApiClient,
    stats: GatewayStats,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/session/login", post(login_handler))
        .route("/session/logout", post(logout_handler))
        .fallback(forward_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL or RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting hikehub-gateway");

    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let cli = Cli::parse();
    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.gateway.listen_addr,
        base_url = %config.api.base_url,
        storage = ?config.session.storage,
        seeded = config.session.access_token.is_some(),
        "configuration loaded"
    );

    let storage = open_storage(&config).await?;
    let http = build_http_client(config.timeout()).context("failed to build HTTP client")?;
    let client = ApiClient::with_storage(
        http,
        config.client_config(),
        storage,
        config.session_config(),
    );

    if let Some(token) = config.session.access_token.take() {
        client
            .session()
            .set_token(token)
            .await
            .context("failed to store seed access token")?;
        info!("seed access token stored");
    }

    let stats = GatewayStats::new();
    watch_session(&client, &stats);

    let app_state = AppState {
        client,
        stats: stats.clone(),
        prometheus: prometheus_handle,
    };
    let app = build_router(app_state, config.gateway.max_connections);

    let listen_addr = config.gateway.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

async fn open_storage(config: &Config) -> Result<Arc<dyn SessionStorage>> {
    match (config.session.storage, &config.session.session_file) {
        (StorageKind::File, Some(path)) => {
            let storage = FileStorage::load(path.clone())
                .await
                .with_context(|| format!("failed to open session file {}", path.display()))?;
            Ok(Arc::new(storage))
        }
        (StorageKind::File, None) => anyhow::bail!("session.session_file is not set"),
        (StorageKind::Memory, _) => Ok(Arc::new(MemoryStorage::new())),
    }
}

/// Count and log session ends; callers learn about them from 401 answers.
fn watch_session(client: &ApiClient, stats: &GatewayStats) {
    let sessions_ended = stats.sessions_ended.clone();
    client
        .session()
        .on_session_ended(move |event: &SessionEnded| {
            sessions_ended.fetch_add(1, Ordering::Relaxed);
            warn!(
                reason = event.reason.label(),
                "organizer session ended, a new login is required"
            );
        });
}

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// Health endpoint: always 200 while the process runs; `status` reports
/// whether a token is currently held.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let authenticated = state.client.session().is_authenticated().await;
    let body = serde_json::json!({
        "status": if authenticated { "authenticated" } else { "unauthenticated" },
        "uptime_seconds": state.stats.started_at.elapsed().as_secs(),
        "requests_served": state.stats.requests_total.load(Ordering::Relaxed),
        "errors_total": state.stats.errors_total.load(Ordering::Relaxed),
        "sessions_ended": state.stats.sessions_ended.load(Ordering::Relaxed),
    });

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Forward the caller's credentials to the login endpoint; the body shape
/// belongs to the backend.
async fn login_handler(State(state): State<AppState>, body: axum::body::Bytes) -> Response {
    let request_id = request_id();
    let credentials: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("login body must be JSON: {e}"),
                &request_id,
            );
        }
    };

    match state.client.login(&credentials).await {
        Ok(()) => axum::Json(serde_json::json!({"status": "authenticated"})).into_response(),
        Err(e) => {
            warn!(error = %e, request_id = %request_id, "login failed");
            client_error_response(&e, &request_id)
        }
    }
}

async fn logout_handler(State(state): State<AppState>) -> Response {
    state.client.logout().await;
    axum::Json(serde_json::json!({"status": "logged_out"})).into_response()
}

/// Catch-all handler that forwards to the HikeHub API.
async fn forward_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    proxy::forward_request(&state.client, &state.stats, request, request_id()).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
