//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    DB_ACTIVE_OPERATIONS, DB_CONNECTION_STATUS, DB_CONNECT_TIMEOUTS_TOTAL, DB_DRAIN_WAIT_SECONDS,
    DB_RECONNECTS_TOTAL, QUEUE_ATTEMPT_SECONDS, QUEUE_BATCHES_TOTAL, QUEUE_DEQUEUED_TOTAL,
    QUEUE_ENGINE_ERRORS_TOTAL, QUEUE_HANDLED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection manager metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn set_connected(connected: bool) {
        DB_CONNECTION_STATUS.set(i64::from(connected));
    }

    pub fn record_reconnect(success: bool) {
        let result = if success { "success" } else { "failure" };
        DB_RECONNECTS_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn record_connect_timeout() {
        DB_CONNECT_TIMEOUTS_TOTAL.inc();
    }

    pub fn record_drain_wait(waited: Duration) {
        DB_DRAIN_WAIT_SECONDS.observe(waited.as_secs_f64());
    }

    /// Shared by every counter in the process, so it moves by deltas.
    pub fn operation_started() {
        DB_ACTIVE_OPERATIONS.inc();
    }

    pub fn operation_finished() {
        DB_ACTIVE_OPERATIONS.dec();
    }
}

/// Helper struct for recording queue metrics
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn record_dequeued(count: usize) {
        QUEUE_DEQUEUED_TOTAL.inc_by(count as u64);
    }

    /// Record a finished batch (`ok`, `empty`, `canceled` or `error`)
    pub fn record_batch(outcome: &str) {
        QUEUE_BATCHES_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn record_engine_error(code: &str) {
        QUEUE_ENGINE_ERRORS_TOTAL.with_label_values(&[code]).inc();
    }

    pub fn observe_attempt(elapsed: Duration) {
        QUEUE_ATTEMPT_SECONDS.observe(elapsed.as_secs_f64());
    }

    pub fn record_handled(success: bool) {
        let result = if success { "success" } else { "failure" };
        QUEUE_HANDLED_TOTAL.with_label_values(&[result]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_recorded_metrics() {
        ConnectionMetrics::record_connect_timeout();
        QueueMetrics::record_engine_error("P0001");

        let output = encode_metrics().unwrap();
        assert!(output.contains("ara_dispatch_db_connect_timeouts_total"));
        assert!(output.contains("ara_dispatch_queue_engine_errors_total"));
    }

    #[test]
    fn test_connection_status_gauge() {
        ConnectionMetrics::set_connected(true);
        assert_eq!(DB_CONNECTION_STATUS.get(), 1);
        ConnectionMetrics::set_connected(false);
        assert_eq!(DB_CONNECTION_STATUS.get(), 0);
    }
}
