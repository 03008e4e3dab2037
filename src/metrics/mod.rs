//! Prometheus metrics for the dispatch core.
//!
//! - Connection metrics (status, reconnects, drain waits, in-flight operations)
//! - Queue metrics (dequeued messages, batch outcomes, engine errors, latency)

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, QueueMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_dispatch";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Database connection status (1 = connected, 0 = disconnected)
    pub static ref DB_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_db_connection_status", METRIC_PREFIX),
        "Database connection status (1=connected, 0=disconnected)"
    ).unwrap();

    /// Reconnect swaps by result
    pub static ref DB_RECONNECTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_db_reconnects_total", METRIC_PREFIX),
        "Total database reconnect attempts",
        &["result"]
    ).unwrap();

    pub static ref DB_CONNECT_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_db_connect_timeouts_total", METRIC_PREFIX),
        "Total connection health checks abandoned by the connect watchdog"
    ).unwrap();

    /// Time a reconnect spent waiting for in-flight operations
    pub static ref DB_DRAIN_WAIT_SECONDS: Histogram = register_histogram!(
        format!("{}_db_drain_wait_seconds", METRIC_PREFIX),
        "Time spent waiting for in-flight operations before a reconnect",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 35.0]
    ).unwrap();

    pub static ref DB_ACTIVE_OPERATIONS: IntGauge = register_int_gauge!(
        format!("{}_db_active_operations", METRIC_PREFIX),
        "Operations currently depending on the database handle"
    ).unwrap();

    // ============================================================================
    // Queue Metrics
    // ============================================================================

    pub static ref QUEUE_DEQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_dequeued_total", METRIC_PREFIX),
        "Total messages removed from the queue"
    ).unwrap();

    /// Batches by outcome (ok, empty, canceled, error)
    pub static ref QUEUE_BATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_queue_batches_total", METRIC_PREFIX),
        "Total dequeue batches by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref QUEUE_ENGINE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_queue_engine_errors_total", METRIC_PREFIX),
        "Queue engine errors by SQLSTATE",
        &["code"]
    ).unwrap();

    /// Latency of a single dequeue attempt (includes the engine wait)
    pub static ref QUEUE_ATTEMPT_SECONDS: Histogram = register_histogram!(
        format!("{}_queue_attempt_seconds", METRIC_PREFIX),
        "Dequeue attempt latency in seconds",
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Messages handed to the message handler by result
    pub static ref QUEUE_HANDLED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_queue_handled_total", METRIC_PREFIX),
        "Messages passed to the handler by result",
        &["result"]
    ).unwrap();
}
