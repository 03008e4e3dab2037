//! HTTP surface for operators: Prometheus scrape and a health summary.
//!
//! - `GET /metrics` - Prometheus text format
//! - `GET /health` - connection status as JSON

mod health;
mod metrics;

pub use health::{health, DatabaseHealthResponse, HealthResponse};
pub use metrics::prometheus_metrics;

use std::sync::Arc;
use std::time::Instant;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::database::{ConnectionManager, Connector};

pub struct AppState<C: Connector> {
    pub manager: Arc<ConnectionManager<C>>,
    pub start_time: Instant,
}

impl<C: Connector> AppState<C> {
    pub fn new(manager: Arc<ConnectionManager<C>>) -> Self {
        Self {
            manager,
            start_time: Instant::now(),
        }
    }
}

// Manual impl: a derive would require `C: Clone`
impl<C: Connector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            start_time: self.start_time,
        }
    }
}

pub fn create_router<C: Connector>(state: AppState<C>) -> Router {
    Router::new()
        .route("/health", get(health::<C>))
        .route("/metrics", get(prometheus_metrics::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until `shutdown` is cancelled.
pub async fn serve<C: Connector>(
    config: &ServerConfig,
    state: AppState<C>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Metrics endpoint listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
