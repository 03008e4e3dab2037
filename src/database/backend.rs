//! Backend abstraction for the managed connection.
//!
//! The connection manager is generic over a [`Connector`] so it can run
//! against PostgreSQL in production and against in-process fakes in tests:
//!
//! - `Connector`: builds a new, not yet validated, pooled handle
//! - `DatabaseHandle`: the pooled handle itself (ping, begin, close)
//! - `DatabaseTransaction`: a transaction begun on a handle

use async_trait::async_trait;

use crate::error::DispatchError;

/// Opens pooled handles to one database endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: DatabaseHandle;

    /// Build a new pooled handle.
    ///
    /// Must not perform network I/O: the first real connect happens in the
    /// health check, which the manager runs under a watchdog.
    async fn open(&self) -> Result<Self::Handle, DispatchError>;

    /// Target description safe for logs (no credentials).
    fn target(&self) -> String;
}

/// A pooled handle owned by the connection manager.
#[async_trait]
pub trait DatabaseHandle: Send + Sync + 'static {
    type Tx: DatabaseTransaction;

    /// Cheap liveness round trip.
    async fn ping(&self) -> Result<(), sqlx::Error>;

    async fn begin(&self) -> Result<Self::Tx, sqlx::Error>;

    /// Refuse new work immediately, then resolve once outstanding work has
    /// released the handle. Idempotent.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A transaction that rolls back if dropped without `commit`.
#[async_trait]
pub trait DatabaseTransaction: Send + 'static {
    async fn commit(self) -> Result<(), sqlx::Error>;

    async fn rollback(self) -> Result<(), sqlx::Error>;
}

/// Transaction type of a connector's handles.
pub type TxOf<C> = <<C as Connector>::Handle as DatabaseHandle>::Tx;
