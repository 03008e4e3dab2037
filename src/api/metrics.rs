//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
};

use super::AppState;
use crate::database::Connector;
use crate::metrics::{self, ConnectionMetrics};

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics<C: Connector>(
    State(state): State<AppState<C>>,
) -> impl IntoResponse {
    // Status gauge mirrors the tracker at scrape time
    ConnectionMetrics::set_connected(state.manager.health().is_connected());

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
