//! Queue data models and error types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::{default_consumer_name, default_queue_name, QueueSettings};
use crate::error::DispatchError;

/// A message removed from the durable queue.
///
/// The queue entry is already gone when this value exists: ownership of the
/// work passes to whoever holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMessage {
    message_id: String,
    raw_payload: Vec<u8>,
    xml_payload: String,
    dequeued_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(message_id: String, xml_payload: String) -> Self {
        Self {
            message_id,
            raw_payload: xml_payload.as_bytes().to_vec(),
            xml_payload,
            dequeued_at: Utc::now(),
        }
    }

    /// Engine-assigned identifier (upper-case hex)
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn raw_payload(&self) -> &[u8] {
        &self.raw_payload
    }

    pub fn xml_payload(&self) -> &str {
        &self.xml_payload
    }

    pub fn dequeued_at(&self) -> DateTime<Utc> {
        self.dequeued_at
    }
}

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue_name: String,
    pub consumer_name: String,
    /// Wait for the first dequeue of a batch
    pub first_wait: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue_name: default_queue_name(),
            consumer_name: default_consumer_name(),
            first_wait: Duration::from_secs(5),
        }
    }
}

impl From<&QueueSettings> for ConsumerConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            queue_name: settings.name.clone(),
            consumer_name: settings.consumer.clone(),
            first_wait: Duration::from_millis(settings.first_wait_ms),
        }
    }
}

/// A batch that ended early.
///
/// Dequeue is destructive, so messages removed before the failure are
/// returned alongside the error instead of being dropped.
#[derive(Debug, Error)]
#[error("{error} ({} message(s) already dequeued)", .messages.len())]
pub struct PartialDequeue {
    pub messages: Vec<QueueMessage>,
    #[source]
    pub error: DispatchError,
}

impl PartialDequeue {
    pub fn is_canceled(&self) -> bool {
        self.error.is_canceled()
    }
}
