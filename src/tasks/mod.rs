mod backoff;
mod poller;
mod reconnect;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use poller::{LoggingHandler, MessageHandler, PollerConfig, QueuePoller};
pub use reconnect::ReconnectTask;
