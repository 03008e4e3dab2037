//! Graceful shutdown for the dispatcher.
//!
//! Order matters: the poller is stopped first so that no batch is cut off
//! mid-transaction by a closing pool, then the connection manager is closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::database::{ConnectionManager, Connector};

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for the poller to finish its current batch (default: 15 seconds)
    pub poller_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            poller_timeout: Duration::from_secs(15),
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

/// Stops background work and closes the database connection
pub struct GracefulShutdown<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    token: CancellationToken,
    config: ShutdownConfig,
}

impl<C: Connector> GracefulShutdown<C> {
    pub fn new(manager: Arc<ConnectionManager<C>>, token: CancellationToken) -> Self {
        Self::with_config(manager, token, ShutdownConfig::default())
    }

    pub fn with_config(
        manager: Arc<ConnectionManager<C>>,
        token: CancellationToken,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            manager,
            token,
            config,
        }
    }

    /// Cancel workers, wait for them (bounded), then close the manager.
    pub async fn execute(self, workers: Vec<JoinHandle<()>>) {
        tracing::info!(workers = workers.len(), "Starting graceful shutdown");
        self.token.cancel();

        for worker in workers {
            let abort = worker.abort_handle();
            match timeout(self.config.poller_timeout, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Worker ended abnormally"),
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.config.poller_timeout.as_millis() as u64,
                        "Worker did not stop in time, aborting"
                    );
                    abort.abort();
                }
            }
        }

        self.manager.close().await;
        tracing::info!("Graceful shutdown complete");
    }
}
