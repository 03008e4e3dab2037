//! In-flight operation counter used as the reconnect admission signal.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::metrics::ConnectionMetrics;

/// Counts callers currently doing work against the installed handle.
///
/// This is not a lock: it never blocks `begin`/`end`. A reconnect reads it to
/// decide how long to wait before swapping the handle. Every change is
/// mirrored into the active-operations gauge as it happens.
#[derive(Debug, Default)]
pub struct OperationCounter {
    active: AtomicUsize,
    idle: Notify,
}

impl OperationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new count.
    pub fn begin(&self) -> usize {
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        ConnectionMetrics::operation_started();
        active
    }

    /// Decrement and return the new count. Never goes below zero; an
    /// unbalanced call is logged and ignored.
    pub fn end(&self) -> usize {
        match self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                ConnectionMetrics::operation_finished();
                self.idle.notify_waiters();
                0
            }
            Ok(previous) => {
                ConnectionMetrics::operation_finished();
                previous - 1
            }
            Err(_) => {
                tracing::warn!("end_operation called with no operation in flight");
                0
            }
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Future that completes the next time the count drops to zero. Call
    /// `enable()` on it before re-checking `active()` to avoid missing the
    /// wakeup.
    pub fn idle_notified(&self) -> Notified<'_> {
        self.idle.notified()
    }

    /// Begin an operation that ends when the guard is dropped.
    pub fn track(&self) -> OperationGuard<'_> {
        self.begin();
        OperationGuard { counter: self }
    }
}

/// Ends its operation on drop, including on early return, panic or
/// cancellation of the owning future.
#[must_use = "the operation ends as soon as the guard is dropped"]
pub struct OperationGuard<'a> {
    counter: &'a OperationCounter,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.counter.end();
    }
}
