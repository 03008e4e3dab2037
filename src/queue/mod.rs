//! Durable mail queue consumer.
//!
//! Messages are removed with destructive dequeue through a server-side shim
//! function (see [`shim`]). A batch blocks for its first message and then
//! drains whatever else is immediately available.

mod consumer;
mod models;
pub mod shim;

pub use consumer::{QueueConsumer, DEQUEUE_GRACE, FOLLOW_UP_WAIT};
pub use models::{ConsumerConfig, PartialDequeue, QueueMessage};
pub use shim::{DequeueRequest, ShimOutcome, ShimRow, ShimSession, QUEUE_EMPTY_CODE};
