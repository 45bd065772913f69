//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `jetstream_controller_reconciliations_total` - Reconcile passes by kind
//! - `jetstream_controller_reconciliation_errors_total` - Failed passes by kind and reason
//! - `jetstream_controller_reconciliation_duration_seconds` - Duration of a reconcile pass
//! - `jetstream_controller_broker_operations_total` - Broker calls by operation and result
//! - `jetstream_controller_broker_changes_total` - Broker entities created, updated or deleted
//! - `jetstream_controller_status_writes_skipped_total` - Status writes avoided because nothing changed
//! - `jetstream_controller_queue_requeues_total` - Keys put back with backoff
//! - `jetstream_controller_queue_drops_total` - Keys dropped after exhausting retries
//! - `jetstream_controller_queue_depth` - Keys currently waiting in a queue
//! - `jetstream_controller_watch_errors_total` - Watch stream errors by kind

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "jetstream_controller_reconciliations_total",
            "Total number of reconcile passes by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "jetstream_controller_reconciliation_errors_total",
            "Total number of failed reconcile passes by resource kind and reason",
        ),
        &["kind", "reason"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "jetstream_controller_reconciliation_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static BROKER_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "jetstream_controller_broker_operations_total",
            "Total number of JetStream API calls by operation and result",
        ),
        &["operation", "result"],
    )
    .expect("Failed to create BROKER_OPERATIONS_TOTAL metric - this should never happen")
});

static BROKER_CHANGES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "jetstream_controller_broker_changes_total",
            "Total number of broker entities created, updated or deleted",
        ),
        &["kind", "change"],
    )
    .expect("Failed to create BROKER_CHANGES_TOTAL metric - this should never happen")
});

static STATUS_WRITES_SKIPPED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "jetstream_controller_status_writes_skipped_total",
            "Total number of status writes skipped because the status was unchanged",
        ),
        &["kind"],
    )
    .expect("Failed to create STATUS_WRITES_SKIPPED_TOTAL metric - this should never happen")
});

static QUEUE_REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "jetstream_controller_queue_requeues_total",
            "Total number of keys requeued with backoff",
        ),
        &["queue"],
    )
    .expect("Failed to create QUEUE_REQUEUES_TOTAL metric - this should never happen")
});

static QUEUE_DROPS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "jetstream_controller_queue_drops_total",
            "Total number of keys dropped after exhausting their retries",
        ),
        &["queue"],
    )
    .expect("Failed to create QUEUE_DROPS_TOTAL metric - this should never happen")
});

static QUEUE_DEPTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "jetstream_controller_queue_depth",
            "Number of keys waiting to be processed",
        ),
        &["queue"],
    )
    .expect("Failed to create QUEUE_DEPTH metric - this should never happen")
});

static WATCH_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "jetstream_controller_watch_errors_total",
            "Total number of watch stream errors by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create WATCH_ERRORS_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(BROKER_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BROKER_CHANGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_WRITES_SKIPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DROPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(WATCH_ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str, reason: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[kind, reason])
        .inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

/// `result` is one of `success`, `not_found`, `error` or `timeout`
pub fn increment_broker_operations(operation: &str, result: &str) {
    BROKER_OPERATIONS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
}

pub fn increment_broker_changes(kind: &str, change: &str) {
    BROKER_CHANGES_TOTAL.with_label_values(&[kind, change]).inc();
}

pub fn increment_status_writes_skipped(kind: &str) {
    STATUS_WRITES_SKIPPED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_queue_requeues(queue: &str) {
    QUEUE_REQUEUES_TOTAL.with_label_values(&[queue]).inc();
}

pub fn increment_queue_drops(queue: &str) {
    QUEUE_DROPS_TOTAL.with_label_values(&[queue]).inc();
}

pub fn set_queue_depth(queue: &str, depth: usize) {
    QUEUE_DEPTH
        .with_label_values(&[queue])
        .set(i64::try_from(depth).unwrap_or(i64::MAX));
}

pub fn increment_watch_errors(kind: &str) {
    WATCH_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_counters_track_each_label() {
        let before = BROKER_OPERATIONS_TOTAL
            .with_label_values(&["metrics_test_op", "timeout"])
            .get();
        increment_broker_operations("metrics_test_op", "timeout");
        increment_broker_operations("metrics_test_op", "timeout");
        increment_broker_operations("metrics_test_op", "success");
        assert_eq!(
            BROKER_OPERATIONS_TOTAL
                .with_label_values(&["metrics_test_op", "timeout"])
                .get(),
            before + 2
        );
    }

    #[test]
    fn test_queue_depth_is_a_gauge() {
        set_queue_depth("metrics_test_queue", 7);
        set_queue_depth("metrics_test_queue", 3);
        assert_eq!(
            QUEUE_DEPTH.with_label_values(&["metrics_test_queue"]).get(),
            3
        );
    }
}
