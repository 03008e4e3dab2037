use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::context::CallContext;
use crate::database::{ConnectionManager, Connector, TxOf};
use crate::error::DispatchError;
use crate::metrics::QueueMetrics;

use super::models::{ConsumerConfig, PartialDequeue, QueueMessage};
use super::shim::{dequeue_once, DequeueRequest, ShimOutcome, ShimSession};

/// Wait used after the first attempt of a batch.
pub const FOLLOW_UP_WAIT: Duration = Duration::from_millis(50);

/// Added to the engine wait to bound each attempt's transaction.
pub const DEQUEUE_GRACE: Duration = Duration::from_secs(5);

/// Pulls messages off the durable queue through the dequeue shim.
///
/// The shim keeps its outputs in shared server-side state, so batches on one
/// consumer never overlap: the configuration mutex doubles as the
/// single-flight lock and is held for a whole [`dequeue_many`] call.
///
/// [`dequeue_many`]: QueueConsumer::dequeue_many
pub struct QueueConsumer<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    state: Mutex<ConsumerConfig>,
}

impl<C> QueueConsumer<C>
where
    C: Connector,
    TxOf<C>: ShimSession,
{
    pub fn new(manager: Arc<ConnectionManager<C>>, config: ConsumerConfig) -> Self {
        Self {
            manager,
            state: Mutex::new(config),
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }

    pub async fn queue_name(&self) -> String {
        self.state.lock().await.queue_name.clone()
    }

    pub async fn set_queue_name(&self, name: impl Into<String>) {
        self.state.lock().await.queue_name = name.into();
    }

    pub async fn consumer_name(&self) -> String {
        self.state.lock().await.consumer_name.clone()
    }

    pub async fn set_consumer_name(&self, name: impl Into<String>) {
        self.state.lock().await.consumer_name = name.into();
    }

    /// Wait applied to the first attempt of each batch.
    pub async fn wait_timeout(&self) -> Duration {
        self.state.lock().await.first_wait
    }

    /// Takes effect from the next batch; waits for a running batch to finish.
    pub async fn set_wait_timeout(&self, wait: Duration) {
        self.state.lock().await.first_wait = wait;
    }

    /// Remove up to `count` messages from the queue. A count of zero is
    /// treated as one.
    ///
    /// The first attempt waits `wait_timeout` for a message; later attempts
    /// only wait briefly, so a batch ends soon after the queue runs dry. An
    /// empty queue ends the batch without error.
    ///
    /// Dequeue is destructive: if the batch stops on cancellation or on an
    /// error, the messages already removed come back inside the
    /// [`PartialDequeue`].
    #[tracing::instrument(
        name = "dequeue_many",
        skip(self, ctx),
        fields(batch_id = %Uuid::new_v4())
    )]
    pub async fn dequeue_many(
        &self,
        ctx: &CallContext,
        count: usize,
    ) -> Result<Vec<QueueMessage>, PartialDequeue> {
        let state = tokio::select! {
            state = self.state.lock() => state,
            reason = ctx.done() => {
                return Err(PartialDequeue {
                    messages: Vec::new(),
                    error: DispatchError::Canceled(reason),
                });
            }
        };

        let count = count.max(1);
        let mut messages = Vec::with_capacity(count);

        if let Err(e) = self.install_shim(ctx).await {
            QueueMetrics::record_batch("error");
            return Err(PartialDequeue {
                messages,
                error: with_context(&state, state.first_wait, e),
            });
        }

        for attempt in 0..count {
            if let Some(reason) = ctx.err() {
                tracing::info!(collected = messages.len(), "Dequeue batch canceled");
                QueueMetrics::record_batch("canceled");
                QueueMetrics::record_dequeued(messages.len());
                return Err(PartialDequeue {
                    messages,
                    error: DispatchError::Canceled(reason),
                });
            }

            let wait = if attempt == 0 {
                state.first_wait
            } else {
                FOLLOW_UP_WAIT
            };
            let request = DequeueRequest::new(&state.queue_name, &state.consumer_name, wait);

            let started = Instant::now();
            let outcome = self
                .manager
                .with_transaction_timeout(ctx, wait + DEQUEUE_GRACE, move |tx| {
                    Box::pin(async move { dequeue_once(tx, &request).await })
                })
                .await;
            QueueMetrics::observe_attempt(started.elapsed());

            match outcome {
                Ok(ShimOutcome::Message(message)) => {
                    tracing::debug!(
                        attempt,
                        message_id = %message.message_id(),
                        payload_bytes = message.raw_payload().len(),
                        "Dequeued message"
                    );
                    messages.push(message);
                }
                Ok(ShimOutcome::Empty) => {
                    tracing::debug!(attempt, wait_ms = wait.as_millis() as u64, "Queue empty");
                    break;
                }
                Err(e) => {
                    let error = with_context(&state, wait, e);
                    if let DispatchError::QueueEngine { code, .. } = &error {
                        QueueMetrics::record_engine_error(code);
                    }
                    if error.is_canceled() {
                        QueueMetrics::record_batch("canceled");
                    } else {
                        tracing::warn!(
                            error = %error,
                            collected = messages.len(),
                            "Dequeue batch aborted"
                        );
                        QueueMetrics::record_batch("error");
                    }
                    QueueMetrics::record_dequeued(messages.len());
                    return Err(PartialDequeue { messages, error });
                }
            }
        }

        QueueMetrics::record_batch(if messages.is_empty() { "empty" } else { "ok" });
        QueueMetrics::record_dequeued(messages.len());
        Ok(messages)
    }

    async fn install_shim(&self, ctx: &CallContext) -> crate::error::Result<()> {
        self.manager
            .with_transaction(ctx, |tx| {
                Box::pin(async move { tx.install_shim().await.map_err(DispatchError::from) })
            })
            .await
    }
}

/// Attach queue context to errors that do not already carry it.
fn with_context(config: &ConsumerConfig, wait: Duration, error: DispatchError) -> DispatchError {
    match error {
        DispatchError::Canceled(_) | DispatchError::QueueEngine { .. } => error,
        other => DispatchError::Dequeue {
            queue: config.queue_name.clone(),
            consumer: config.consumer_name.clone(),
            wait,
            source: Box::new(other),
        },
    }
}
