use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::QueueSettings;
use crate::context::CallContext;
use crate::database::{Connector, TxOf};
use crate::metrics::QueueMetrics;
use crate::queue::{QueueConsumer, QueueMessage, ShimSession};

use super::backoff::{BackoffConfig, ExponentialBackoff};

/// Receives every message the poller takes off the queue.
///
/// The queue entry is already gone when `handle` is called; a handler error
/// is logged and the message is not retried.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: QueueMessage) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Messages requested per batch
    pub batch_size: usize,
    /// Pause after a batch that found the queue empty
    pub idle_delay: Duration,
    pub backoff: BackoffConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            idle_delay: Duration::from_secs(1),
            backoff: BackoffConfig::default(),
        }
    }
}

impl From<&QueueSettings> for PollerConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            idle_delay: Duration::from_millis(settings.idle_delay_ms),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Background task that drains the queue into a [`MessageHandler`].
pub struct QueuePoller<C: Connector> {
    consumer: Arc<QueueConsumer<C>>,
    handler: Arc<dyn MessageHandler>,
    config: PollerConfig,
    shutdown: CancellationToken,
}

impl<C> QueuePoller<C>
where
    C: Connector,
    TxOf<C>: ShimSession,
{
    pub fn new(
        consumer: Arc<QueueConsumer<C>>,
        handler: Arc<dyn MessageHandler>,
        config: PollerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            consumer,
            handler,
            config,
            shutdown,
        }
    }

    /// Poll until the shutdown token fires.
    pub async fn run(self) {
        let mut backoff = ExponentialBackoff::with_config(self.config.backoff.clone());

        tracing::info!(
            batch_size = self.config.batch_size,
            idle_delay_ms = self.config.idle_delay.as_millis() as u64,
            "Queue poller started"
        );

        while !self.shutdown.is_cancelled() {
            let ctx = CallContext::with_token(self.shutdown.child_token());

            let pause = match self.consumer.dequeue_many(&ctx, self.config.batch_size).await {
                Ok(messages) => {
                    backoff.reset();
                    let idle = messages.is_empty();
                    self.dispatch(messages).await;
                    idle.then_some(self.config.idle_delay)
                }
                Err(partial) => {
                    let canceled = partial.is_canceled();
                    self.dispatch(partial.messages).await;
                    if canceled {
                        break;
                    }
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %partial.error,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Dequeue batch failed"
                    );
                    Some(delay)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!("Queue poller stopped");
    }

    /// Hand messages to the handler in queue order. Runs to completion even
    /// during shutdown: the messages are no longer in the queue.
    async fn dispatch(&self, messages: Vec<QueueMessage>) {
        for message in messages {
            let message_id = message.message_id().to_string();
            match self.handler.handle(message).await {
                Ok(()) => QueueMetrics::record_handled(true),
                Err(e) => {
                    QueueMetrics::record_handled(false);
                    tracing::error!(message_id = %message_id, error = %e, "Message handler failed");
                }
            }
        }
    }
}

/// Handler that only logs what it receives.
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: QueueMessage) -> anyhow::Result<()> {
        tracing::info!(
            message_id = %message.message_id(),
            payload_bytes = message.raw_payload().len(),
            dequeued_at = %message.dequeued_at(),
            "Received mail message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_config_from_settings() {
        let settings = QueueSettings {
            batch_size: 25,
            idle_delay_ms: 250,
            ..QueueSettings::default()
        };
        let config = PollerConfig::from(&settings);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.idle_delay, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_logging_handler_accepts_messages() {
        let message = QueueMessage::new("0A".to_string(), "<mail/>".to_string());
        assert!(LoggingHandler.handle(message).await.is_ok());
    }
}
