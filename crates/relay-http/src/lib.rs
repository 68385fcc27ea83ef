//! Liveness HTTP server built on axum.
//!
//! Hosting platforms probe `/health`; the keep-alive task pings `/ping`.

use std::{net::SocketAddr, sync::Arc};

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use relay_core::{
    errors::Error,
    relay::{StatusProvider, StatusSnapshot},
    Result,
};

#[derive(Clone)]
pub struct HttpState {
    pub status: Arc<dyn StatusProvider>,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub service: &'static str,
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub forwarded_count: u64,
    pub last_forwarded_id: i32,
}

async fn get_root(State(state): State<HttpState>) -> Json<RootResponse> {
    Json(RootResponse {
        service: state.service,
        status: "running",
        version: state.version,
    })
}

async fn get_health(State(state): State<HttpState>) -> Json<HealthResponse> {
    let s = state.status.status().await;
    Json(HealthResponse {
        status: "healthy",
        uptime_secs: s.uptime_secs,
        forwarded_count: s.forwarded_count,
        last_forwarded_id: s.last_forwarded_id,
    })
}

async fn get_status(State(state): State<HttpState>) -> Json<StatusSnapshot> {
    Json(state.status.status().await)
}

async fn get_ping() -> &'static str {
    "pong"
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/status", get(get_status))
        .route("/ping", get(get_ping))
        .with_state(state)
}

/// Serve the liveness routes on `addr` until `cancel` fires.
pub async fn serve(addr: SocketAddr, state: HttpState, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind HTTP server to {addr}: {e}")))?;

    info!(%addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
