use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ara_mail_dispatch::api::{self, AppState};
use ara_mail_dispatch::config::Settings;
use ara_mail_dispatch::database::{ConnectionManager, ManagerConfig, PostgresConnector};
use ara_mail_dispatch::queue::{ConsumerConfig, QueueConsumer};
use ara_mail_dispatch::shutdown::{wait_for_signal, GracefulShutdown};
use ara_mail_dispatch::tasks::{LoggingHandler, PollerConfig, QueuePoller};
use ara_mail_dispatch::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().context("Failed to load configuration")?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    // Open the database connection; a failed first connect is fatal
    let connector = PostgresConnector::new(&settings.database)?;
    let manager = Arc::new(ConnectionManager::new(
        connector,
        ManagerConfig::from_settings(&settings.database),
    ));
    manager
        .open()
        .await
        .context("Failed to open database connection")?;
    manager.spawn_reconnect_cycle();

    // Start the queue poller
    let shutdown = CancellationToken::new();
    let consumer = Arc::new(QueueConsumer::new(
        manager.clone(),
        ConsumerConfig::from(&settings.queue),
    ));
    let poller = QueuePoller::new(
        consumer,
        Arc::new(LoggingHandler),
        PollerConfig::from(&settings.queue),
        shutdown.clone(),
    );
    let mut workers = vec![tokio::spawn(poller.run())];

    // Optional metrics and health endpoint
    if settings.server.enabled {
        let server = settings.server.clone();
        let state = AppState::new(manager.clone());
        let token = shutdown.clone();
        workers.push(tokio::spawn(async move {
            if let Err(e) = api::serve(&server, state, token).await {
                tracing::error!(error = %e, "Metrics endpoint failed");
            }
        }));
    }

    tracing::info!(
        queue = %settings.queue.name,
        consumer = %settings.queue.consumer,
        "Mail dispatcher running"
    );

    wait_for_signal().await;

    GracefulShutdown::new(manager, shutdown)
        .execute(workers)
        .await;

    Ok(())
}
