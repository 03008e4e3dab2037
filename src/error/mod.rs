use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why a caller-scoped operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired
    Canceled,
    /// The caller's deadline elapsed
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Canceled => f.write_str("context canceled"),
            CancelReason::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database connection unavailable")]
    ConnectionUnavailable,

    #[error("Connection health check did not complete within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection health check failed: {0}")]
    HealthCheck(#[source] sqlx::Error),

    #[error("Failed to begin transaction: {0}")]
    TransactionBegin(#[source] sqlx::Error),

    #[error("Transaction exceeded execution timeout of {0:?}")]
    ExecTimeout(Duration),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue engine error {code} on {queue} (consumer {consumer}, wait {wait:?}): {message}")]
    QueueEngine {
        queue: String,
        consumer: String,
        wait: Duration,
        code: String,
        message: String,
    },

    #[error("Dequeue from {queue} (consumer {consumer}, wait {wait:?}) failed: {source}")]
    Dequeue {
        queue: String,
        consumer: String,
        wait: Duration,
        #[source]
        source: Box<DispatchError>,
    },

    #[error("Operation canceled: {0}")]
    Canceled(CancelReason),
}

impl DispatchError {
    /// True when the caller ended the operation (shutdown, deadline), as
    /// opposed to a database or queue engine fault.
    pub fn is_canceled(&self) -> bool {
        match self {
            DispatchError::Canceled(_) => true,
            DispatchError::Dequeue { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// True when no handle was installed at the time of the call.
    pub fn is_connection_unavailable(&self) -> bool {
        match self {
            DispatchError::ConnectionUnavailable => true,
            DispatchError::Dequeue { source, .. } => source.is_connection_unavailable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
