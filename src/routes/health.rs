//! Health, readiness, version, and stats endpoints
//!
//! Liveness returns 200 whenever the gateway is running. Readiness
//! additionally requires the collaborators that were mandatory at
//! startup to have connected.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

use super::{error_response, json_response};

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    node_id: String,
    mode: &'static str,
    database_connected: bool,
    queue_connected: bool,
    timestamp: String,
}

fn build_health(state: &AppState) -> HealthResponse {
    let degraded = !state.database_connected || !state.queue_connected;

    HealthResponse {
        healthy: true,
        status: if degraded { "degraded" } else { "online" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        node_id: state.args.node_id.to_string(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        database_connected: state.database_connected,
        queue_connected: state.queue_connected,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// GET /health, /healthz - liveness probe
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &build_health(&state))
}

/// GET /ready, /readyz - readiness probe
pub fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let health = build_health(&state);

    let status = if state.database_connected && state.queue_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    json_response(status, &health)
}

#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    service: &'static str,
}

/// GET /version
pub fn version_info() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            version: env!("CARGO_PKG_VERSION"),
            service: "holdfast",
        },
    )
}

/// GET /stats - request/deal counts and wallet balance
pub async fn handle_stats(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.gateway.service_stats().await {
        Ok(stats) => json_response(StatusCode::OK, &stats),
        Err(e) => error_response(&e),
    }
}
