use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::{net::TcpListener, signal, sync::watch};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{ServerConfig, TlsFiles};
use crate::session::{websocket_handler, SessionConfig};
use crate::switchboard::Switchboard;

/// Router state shared by every handler and session.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    switchboard: Switchboard,
    session: SessionConfig,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        switchboard: Switchboard,
        session: SessionConfig,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                switchboard,
                session,
                metrics,
            }),
        }
    }

    pub fn switchboard(&self) -> &Switchboard {
        &self.inner.switchboard
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.inner.session
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/debug/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serves the relay on an already-bound plain TCP listener.
pub async fn serve_listener<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server shutdown with error")
}

/// Runs the primary listener and the optional plain listener until ctrl-c.
pub async fn run(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Result<()> {
    let ServerConfig {
        listen_addr,
        plain_addr,
        tls,
        session,
        shutdown_grace,
    } = config;
    let state = AppState::new(Switchboard::new(), session, metrics);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let primary = {
        let state = state.clone();
        let shutdown = shutdown_rx.clone();
        async move {
            match &tls {
                Some(tls) => serve_tls(listen_addr, tls, state, shutdown).await,
                None => serve_plain(listen_addr, state, shutdown).await,
            }
        }
    };

    let secondary = {
        let state = state.clone();
        let shutdown = shutdown_rx.clone();
        async move {
            match plain_addr {
                Some(addr) => serve_plain(addr, state, shutdown).await,
                None => Ok(()),
            }
        }
    };

    tokio::try_join!(primary, secondary)?;

    info!(
        grace_seconds = shutdown_grace.as_secs(),
        "listeners stopped; waiting for grace period"
    );
    tokio::time::sleep(shutdown_grace).await;
    info!("shutdown complete");
    Ok(())
}

async fn serve_plain(addr: SocketAddr, state: AppState, shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "dial-relay listening (plain)");
    serve_listener(listener, state, wait_for_shutdown(shutdown)).await
}

#[cfg(feature = "tls")]
async fn serve_tls(
    addr: SocketAddr,
    tls: &TlsFiles,
    state: AppState,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .with_context(|| {
            format!(
                "failed to load TLS material from {} and {}",
                tls.cert.display(),
                tls.key.display()
            )
        })?;

    let handle = axum_server::Handle::new();
    let stopper = handle.clone();
    tokio::spawn(async move {
        wait_for_shutdown(shutdown).await;
        stopper.graceful_shutdown(None);
    });

    info!(addr = %addr, "dial-relay listening (tls)");
    axum_server::bind_rustls(addr, rustls)
        .handle(handle)
        .serve(router(state).into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("tls server shutdown with error")
}

#[cfg(not(feature = "tls"))]
async fn serve_tls(
    addr: SocketAddr,
    tls: &TlsFiles,
    _state: AppState,
    _shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tracing::warn!(
        addr = %addr,
        cert = %tls.cert.display(),
        "TLS listener requested but the `tls` feature is disabled"
    );
    anyhow::bail!("dial-relay was built without the `tls` feature; rebuild with --features tls")
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.switchboard().stats())
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .inner
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
