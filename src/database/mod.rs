//! Managed database connection.
//!
//! - `ConnectionManager`: owns the single pooled handle, its health, and its
//!   periodic replacement
//! - `OperationCounter`: in-flight work signal consulted by reconnects
//! - `ConnectionHealth`: connection status tracking
//! - `backend`: connector/handle/transaction traits
//! - `postgres`: the `sqlx` PostgreSQL backend

pub mod backend;
mod counter;
mod health;
mod manager;
pub mod postgres;

pub use backend::{Connector, DatabaseHandle, DatabaseTransaction, TxOf};
pub use counter::{OperationCounter, OperationGuard};
pub use health::{ConnectionHealth, ConnectionHealthStats, ConnectionStatus};
pub use manager::{ConnectionManager, ManagerConfig};
pub use postgres::{PostgresConnector, PostgresHandle};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
