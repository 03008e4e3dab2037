//! Owner of the single pooled database handle.
//!
//! # Access discipline
//!
//! The handle lives behind an async `RwLock` and is only reachable through
//! scoped functions:
//!
//! - [`ConnectionManager::with_read_access`] holds the **shared** section for
//!   the whole duration of the caller's closure. Readers run in parallel, and
//!   a reconnect or close waits until every reader has finished.
//! - [`ConnectionManager::with_transaction`] takes the **exclusive** section
//!   only long enough to clone the handle and register an in-flight
//!   operation, then releases it before beginning the transaction. The
//!   in-flight counter is the *only* thing protecting a transaction from a
//!   concurrent reconnect.
//!
//! A reconnect waits for the counter to drain, but only up to a bounded
//! ceiling; after that it swaps the handle anyway. Transactions that are
//! still running keep their own `Arc` of the retired handle, and the retired
//! pool refuses new work while letting outstanding work finish (see
//! [`DatabaseHandle::close`]). Raw [`begin_operation`] / [`end_operation`]
//! calls must always be paired by the caller; nothing here can detect a
//! missing `end_operation` other than a reconnect that keeps hitting its
//! drain ceiling.
//!
//! [`begin_operation`]: ConnectionManager::begin_operation
//! [`end_operation`]: ConnectionManager::end_operation

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::DatabaseConfig;
use crate::context::CallContext;
use crate::error::{CancelReason, DispatchError, Result};
use crate::metrics::ConnectionMetrics;
use crate::tasks::{BackoffConfig, ReconnectTask};

use super::backend::{Connector, DatabaseHandle, DatabaseTransaction, TxOf};
use super::counter::OperationCounter;
use super::current_time_ms;
use super::health::ConnectionHealth;

/// Timing policy for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interval of the background reconnect cycle (default: 30 minutes)
    pub reconnect_interval: Duration,
    /// First retry delay after a failed periodic reconnect (default: 1 second)
    pub reconnect_retry_initial: Duration,
    /// Cap of the retry backoff (default: 60 seconds)
    pub reconnect_retry_max: Duration,
    /// Budget for `check_health` (default: 5 seconds)
    pub health_check_timeout: Duration,
    /// Ceiling for any transaction (default: 60 seconds)
    pub exec_timeout: Duration,
    /// Watchdog budget for validating a new handle (default: 45 seconds)
    pub connect_timeout: Duration,
    /// Ceiling of the passive drain wait before a swap (default: 35 seconds)
    pub drain_timeout: Duration,
    /// Re-check interval while draining (default: 100ms)
    pub drain_poll_interval: Duration,
    /// Minimum spacing of drain progress logs (default: 1 second)
    pub drain_log_interval: Duration,
    /// Extra counter checks after the drain ceiling (default: 3)
    pub drain_retry_attempts: u32,
    /// Spacing of those checks (default: 100ms)
    pub drain_retry_delay: Duration,
    /// How long a swap waits for the retired handle to close (default: 10 seconds)
    pub close_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(30 * 60),
            reconnect_retry_initial: Duration::from_secs(1),
            reconnect_retry_max: Duration::from_secs(60),
            health_check_timeout: Duration::from_secs(5),
            exec_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(45),
            drain_timeout: Duration::from_secs(35),
            drain_poll_interval: Duration::from_millis(100),
            drain_log_interval: Duration::from_secs(1),
            drain_retry_attempts: 3,
            drain_retry_delay: Duration::from_millis(100),
            close_timeout: Duration::from_secs(10),
        }
    }
}

impl ManagerConfig {
    /// Timeouts from settings; the reconnect cycle keeps its fixed default.
    pub fn from_settings(config: &DatabaseConfig) -> Self {
        Self {
            health_check_timeout: config.health_check_timeout(),
            exec_timeout: config.exec_timeout(),
            connect_timeout: config.connect_timeout(),
            ..Self::default()
        }
    }
}

pub struct ConnectionManager<C: Connector> {
    connector: C,
    config: ManagerConfig,
    handle: RwLock<Option<Arc<C::Handle>>>,
    operations: OperationCounter,
    health: ConnectionHealth,
    last_reconnect_ms: AtomicI64,
    shutdown: CancellationToken,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, config: ManagerConfig) -> Self {
        Self {
            connector,
            config,
            handle: RwLock::new(None),
            operations: OperationCounter::new(),
            health: ConnectionHealth::new(),
            last_reconnect_ms: AtomicI64::new(0),
            shutdown: CancellationToken::new(),
            reconnect_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Open and validate the first handle.
    ///
    /// Fails with [`DispatchError::ConnectTimeout`] if the health check does
    /// not finish within the connect budget. Whether that is fatal is up to
    /// the caller.
    pub async fn open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DispatchError::ConnectionUnavailable);
        }

        let mut guard = self.handle.write().await;
        if let Some(previous) = guard.take() {
            self.retire(previous).await;
        }

        match self.connect().await {
            Ok(handle) => {
                *guard = Some(handle);
                self.health.set_connected();
                ConnectionMetrics::set_connected(true);
                tracing::info!(target_db = %self.connector.target(), "Database connection opened");
                Ok(())
            }
            Err(e) => {
                self.health.set_failed();
                ConnectionMetrics::set_connected(false);
                Err(e)
            }
        }
    }

    /// Stop the reconnect cycle and close the handle. Idempotent.
    pub async fn close(&self) {
        self.shutdown.cancel();

        let task = self
            .reconnect_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Reconnect cycle ended abnormally");
            }
        }

        let previous = self.handle.write().await.take();
        if let Some(previous) = previous {
            self.retire(previous).await;
            tracing::info!("Database connection closed");
        }

        self.health.set_disconnected();
        ConnectionMetrics::set_connected(false);
    }

    /// Liveness probe bounded by the health check timeout. Never errors.
    pub async fn check_health(&self) -> bool {
        let probe = async {
            let handle = self.handle.read().await.clone();
            match handle {
                Some(handle) => handle.ping().await.is_ok(),
                None => false,
            }
        };

        match timeout(self.config.health_check_timeout, probe).await {
            Ok(healthy) => healthy,
            Err(_) => {
                tracing::debug!(
                    timeout_ms = self.config.health_check_timeout.as_millis() as u64,
                    "Health check timed out"
                );
                false
            }
        }
    }

    /// Replace the handle with a freshly validated one.
    ///
    /// 1. Wait (without locking) for in-flight operations to drain, up to
    ///    `drain_timeout`.
    /// 2. If the ceiling was hit, re-check the counter a few more times.
    /// 3. Take the exclusive section, close the old handle, connect and
    ///    install a new one. Proceeds even if operations are still in flight.
    #[tracing::instrument(name = "reconnect", skip(self))]
    pub async fn reconnect(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DispatchError::ConnectionUnavailable);
        }

        let started = Instant::now();
        self.health.set_reconnecting();

        let drained = self.wait_for_drain().await || self.retry_drain_check().await;
        ConnectionMetrics::record_drain_wait(started.elapsed());

        let mut guard = self.handle.write().await;
        if self.is_closed() {
            return Err(DispatchError::ConnectionUnavailable);
        }

        let still_active = self.operations.active();
        if still_active > 0 {
            tracing::warn!(
                active_operations = still_active,
                drained,
                "Swapping connection while operations are still in flight"
            );
        }

        if let Some(previous) = guard.take() {
            self.retire(previous).await;
        }

        match self.connect().await {
            Ok(handle) => {
                *guard = Some(handle);
                self.last_reconnect_ms
                    .store(current_time_ms(), Ordering::Release);
                self.health.set_connected();
                ConnectionMetrics::record_reconnect(true);
                ConnectionMetrics::set_connected(true);
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Database connection replaced"
                );
                Ok(())
            }
            Err(e) => {
                self.health.set_failed();
                ConnectionMetrics::record_reconnect(false);
                ConnectionMetrics::set_connected(false);
                tracing::error!(error = %e, "Reconnect failed, no connection installed");
                Err(e)
            }
        }
    }

    /// Start the periodic reconnect cycle. A second call is a no-op.
    pub fn spawn_reconnect_cycle(self: &Arc<Self>) {
        let mut slot = self
            .reconnect_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() || self.is_closed() {
            return;
        }

        let task = ReconnectTask::new(
            Arc::downgrade(self),
            self.config.reconnect_interval,
            BackoffConfig {
                initial_delay: self.config.reconnect_retry_initial,
                max_delay: self.config.reconnect_retry_max,
                ..BackoffConfig::default()
            },
            self.shutdown.child_token(),
        );
        *slot = Some(tokio::spawn(task.run()));
    }

    /// Run `f` against the current handle while holding the shared section.
    pub async fn with_read_access<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'h> FnOnce(&'h C::Handle) -> BoxFuture<'h, Result<T>> + Send,
    {
        let guard = self.handle.read().await;
        let handle = guard
            .as_deref()
            .ok_or(DispatchError::ConnectionUnavailable)?;
        f(handle).await
    }

    /// Run `f` in a transaction bounded by the caller's deadline and the
    /// exec timeout. Commits only if `f` succeeds.
    pub async fn with_transaction<T, F>(&self, ctx: &CallContext, f: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut TxOf<C>) -> BoxFuture<'t, Result<T>> + Send,
    {
        self.with_transaction_timeout(ctx, self.config.exec_timeout, f)
            .await
    }

    /// Like [`with_transaction`](Self::with_transaction) with a tighter
    /// operation limit. The limit is still capped at the exec timeout.
    pub async fn with_transaction_timeout<T, F>(
        &self,
        ctx: &CallContext,
        limit: Duration,
        f: F,
    ) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut TxOf<C>) -> BoxFuture<'t, Result<T>> + Send,
    {
        if let Some(reason) = ctx.err() {
            return Err(DispatchError::Canceled(reason));
        }

        // A reconnect holds the exclusive section for its whole swap, so the
        // wait for it must stay cancellable.
        let (handle, _operation) = {
            let guard = tokio::select! {
                guard = self.handle.write() => guard,
                reason = ctx.done() => return Err(DispatchError::Canceled(reason)),
            };
            let handle = guard
                .as_ref()
                .cloned()
                .ok_or(DispatchError::ConnectionUnavailable)?;
            (handle, self.operations.track())
        };
        if let Some(reason) = ctx.err() {
            return Err(DispatchError::Canceled(reason));
        }

        let limit = limit.min(self.config.exec_timeout);
        let (deadline, caller_bound) = ctx.bounded(limit);

        let work = async {
            let mut tx = handle
                .begin()
                .await
                .map_err(DispatchError::TransactionBegin)?;

            match f(&mut tx).await {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::debug!(error = %rollback_err, "Rollback after failure also failed");
                    }
                    Err(e)
                }
            }
        };

        tokio::select! {
            result = timeout_at(deadline, work) => match result {
                Ok(result) => result,
                Err(_) if caller_bound => Err(DispatchError::Canceled(CancelReason::DeadlineExceeded)),
                Err(_) => Err(DispatchError::ExecTimeout(limit)),
            },
            _ = ctx.token().cancelled() => Err(DispatchError::Canceled(CancelReason::Canceled)),
        }
    }

    /// Register work that depends on the current handle. Must be paired with
    /// [`end_operation`](Self::end_operation).
    pub fn begin_operation(&self) {
        self.operations.begin();
    }

    pub fn end_operation(&self) {
        self.operations.end();
    }

    pub fn active_operations(&self) -> usize {
        self.operations.active()
    }

    /// Time of the last successful reconnect swap.
    pub fn last_reconnect(&self) -> Option<DateTime<Utc>> {
        match self.last_reconnect_ms.load(Ordering::Acquire) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Build a handle and validate it under the connect watchdog.
    ///
    /// The health check runs in its own task. If the watchdog fires first the
    /// check is abandoned rather than joined; the task closes the handle
    /// itself whenever the check finally returns.
    async fn connect(&self) -> Result<Arc<C::Handle>> {
        let handle = Arc::new(self.connector.open().await?);

        let (result_tx, result_rx) = oneshot::channel();
        let probe = handle.clone();
        tokio::spawn(async move {
            let result = probe.ping().await;
            if result_tx.send(result).is_err() {
                tracing::debug!("Discarding late health check result of abandoned connection");
                probe.close().await;
            }
        });

        match timeout(self.config.connect_timeout, result_rx).await {
            Ok(Ok(Ok(()))) => Ok(handle),
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, target_db = %self.connector.target(), "Connection health check failed");
                spawn_close(handle);
                Err(DispatchError::HealthCheck(e))
            }
            Ok(Err(_)) => {
                spawn_close(handle);
                Err(DispatchError::HealthCheck(sqlx::Error::WorkerCrashed))
            }
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.config.connect_timeout.as_millis() as u64,
                    target_db = %self.connector.target(),
                    "Connection health check timed out, abandoning handle"
                );
                ConnectionMetrics::record_connect_timeout();
                spawn_close(handle);
                Err(DispatchError::ConnectTimeout(self.config.connect_timeout))
            }
        }
    }

    /// Close a handle that has been taken out of service.
    async fn retire(&self, handle: Arc<C::Handle>) {
        let closing = tokio::spawn(async move { handle.close().await });
        match timeout(self.config.close_timeout, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Closing previous connection failed"),
            Err(_) => tracing::warn!(
                timeout_ms = self.config.close_timeout.as_millis() as u64,
                "Previous connection still in use, finishing close in background"
            ),
        }
    }

    /// Phase 1: passive wait for the in-flight counter to reach zero.
    async fn wait_for_drain(&self) -> bool {
        let deadline = Instant::now() + self.config.drain_timeout;
        let mut last_logged: Option<(usize, Instant)> = None;

        loop {
            let idle = self.operations.idle_notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            let active = self.operations.active();
            if active == 0 {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    active_operations = active,
                    drain_timeout_ms = self.config.drain_timeout.as_millis() as u64,
                    "Drain wait ceiling reached, proceeding with reconnect"
                );
                return false;
            }

            let should_log = match last_logged {
                Some((count, at)) => {
                    count != active || now.duration_since(at) >= self.config.drain_log_interval
                }
                None => true,
            };
            if should_log {
                tracing::info!(active_operations = active, "Waiting for operations to drain before reconnect");
                last_logged = Some((active, now));
            }

            let nap = self.config.drain_poll_interval.min(deadline - now);
            tokio::select! {
                _ = &mut idle => {}
                _ = tokio::time::sleep(nap) => {}
                _ = self.shutdown.cancelled() => return false,
            }
        }
    }

    /// Phase 2: a few short-spaced re-checks after the drain ceiling.
    async fn retry_drain_check(&self) -> bool {
        for _ in 0..self.config.drain_retry_attempts {
            if self.is_closed() {
                return false;
            }
            tokio::time::sleep(self.config.drain_retry_delay).await;
            if self.operations.active() == 0 {
                return true;
            }
        }
        false
    }
}

fn spawn_close<H: DatabaseHandle>(handle: Arc<H>) {
    tokio::spawn(async move { handle.close().await });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.reconnect_interval, Duration::from_secs(1800));
        assert_eq!(config.drain_timeout, Duration::from_secs(35));
        assert!(config.connect_timeout > config.health_check_timeout);
        assert!(config.reconnect_retry_initial < config.reconnect_retry_max);
        assert!(config.reconnect_retry_max < config.reconnect_interval);
    }

    #[test]
    fn test_config_from_settings_keeps_fixed_interval() {
        let settings = DatabaseConfig {
            exec_timeout_seconds: 12,
            connect_timeout_seconds: 7,
            ..DatabaseConfig::default()
        };
        let config = ManagerConfig::from_settings(&settings);
        assert_eq!(config.exec_timeout, Duration::from_secs(12));
        assert_eq!(config.connect_timeout, Duration::from_secs(7));
        assert_eq!(config.reconnect_interval, Duration::from_secs(1800));
    }
}
