//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;

use crate::AppState;

/// Bound on the transport reachability check
const TRANSPORT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" while the event log is unreachable
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Whether new runs will be event-driven (otherwise they fall back to direct)
    pub transport_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let transport_available = tokio::time::timeout(TRANSPORT_CHECK_TIMEOUT, state.transport.is_available())
        .await
        .unwrap_or(false);

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if transport_available { "ok" } else { "degraded" }.to_string(),
        module: "clipmind-analyzer".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        transport_available,
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
