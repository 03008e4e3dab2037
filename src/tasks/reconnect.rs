use std::sync::Weak;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffConfig, ExponentialBackoff};
use crate::database::{ConnectionManager, Connector};

/// Background task that periodically replaces the managed connection.
///
/// Holds only a weak reference so an abandoned manager is not kept alive by
/// its own cycle. A failed periodic reconnect leaves no handle installed, so
/// the task retries with backoff until one succeeds instead of waiting for
/// the next regular tick.
pub struct ReconnectTask<C: Connector> {
    manager: Weak<ConnectionManager<C>>,
    interval: Duration,
    retry: BackoffConfig,
    shutdown: CancellationToken,
}

impl<C: Connector> ReconnectTask<C> {
    pub fn new(
        manager: Weak<ConnectionManager<C>>,
        interval: Duration,
        retry: BackoffConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            manager,
            interval,
            retry,
            shutdown,
        }
    }

    /// Run until shutdown. Reconnect failures are logged, never propagated.
    pub async fn run(self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Reconnect cycle started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = timer.tick() => {
                    let Some(manager) = self.manager.upgrade() else {
                        break;
                    };
                    let result = manager.reconnect().await;
                    drop(manager);

                    if let Err(e) = result {
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        tracing::error!(error = %e, "Periodic reconnect failed");
                        if !self.retry_until_connected().await {
                            break;
                        }
                        // Next regular swap counts from the recovery
                        timer.reset();
                    }
                }
            }
        }

        tracing::info!("Reconnect cycle stopped");
    }

    /// Retry with backoff. Returns false if the task should stop.
    async fn retry_until_connected(&self) -> bool {
        let mut backoff = ExponentialBackoff::with_config(self.retry.clone());

        loop {
            let delay = backoff.next_delay();
            tracing::warn!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Retrying reconnect after failure"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(manager) = self.manager.upgrade() else {
                return false;
            };
            match manager.reconnect().await {
                Ok(()) => {
                    tracing::info!(
                        attempts = backoff.attempt(),
                        "Reconnect recovered after retries"
                    );
                    return true;
                }
                Err(_) if self.shutdown.is_cancelled() => return false,
                Err(e) => {
                    tracing::error!(error = %e, attempt = backoff.attempt(), "Reconnect retry failed");
                }
            }
        }
    }
}
