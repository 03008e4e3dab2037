//! Health endpoint.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::database::Connector;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub database: DatabaseHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealthResponse {
    pub status: String,
    /// Result of a live ping bounded by the health check timeout
    pub reachable: bool,
    pub active_operations: usize,
    pub failed_attempts: u32,
    pub total_reconnects: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconnect: Option<DateTime<Utc>>,
}

/// GET /health
pub async fn health<C: Connector>(State(state): State<AppState<C>>) -> Json<HealthResponse> {
    let reachable = state.manager.check_health().await;
    let stats = state.manager.health().stats();

    let status = if reachable { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database: DatabaseHealthResponse {
            status: stats.status.as_str().to_string(),
            reachable,
            active_operations: state.manager.active_operations(),
            failed_attempts: stats.failed_attempts,
            total_reconnects: stats.total_reconnects,
            last_reconnect: state.manager.last_reconnect(),
        },
    })
}
