//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `oneagent_operator_reconciliations_total` - Reconciliations by resource kind
//! - `oneagent_operator_reconciliation_errors_total` - Failed reconciliations by resource kind
//! - `oneagent_operator_reconciliation_duration_seconds` - Duration of reconciliations
//! - `oneagent_operator_rate_limited_total` - Cycles aborted by a 429 from the monitoring API
//! - `oneagent_operator_token_probes_total` - Remote token verifications by token and result
//! - `oneagent_operator_pods_replaced_total` - Agent pods replaced during rolling updates
//! - `oneagent_operator_rollout_timeouts_total` - Replacement pods that never became ready
//! - `oneagent_operator_istio_objects_total` - Istio objects created / deleted
//! - `oneagent_operator_workload_operations_total` - DaemonSet creates / updates
//! - `oneagent_operator_requeues_total` - Requeues by reason

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "oneagent_operator_reconciliations_total",
            "Total number of reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "oneagent_operator_reconciliation_errors_total",
            "Total number of reconciliation errors",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "oneagent_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static RATE_LIMITED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "oneagent_operator_rate_limited_total",
        "Total number of cycles aborted because the monitoring API rate-limited the operator",
    )
    .expect("Failed to create RATE_LIMITED_TOTAL metric - this should never happen")
});

static TOKEN_PROBES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "oneagent_operator_token_probes_total",
            "Total number of remote token verifications",
        ),
        &["token", "result"],
    )
    .expect("Failed to create TOKEN_PROBES_TOTAL metric - this should never happen")
});

static PODS_REPLACED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "oneagent_operator_pods_replaced_total",
        "Total number of agent pods replaced to roll out a newer version",
    )
    .expect("Failed to create PODS_REPLACED_TOTAL metric - this should never happen")
});

static ROLLOUT_TIMEOUTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "oneagent_operator_rollout_timeouts_total",
        "Total number of replacement pods that did not become ready in time",
    )
    .expect("Failed to create ROLLOUT_TIMEOUTS_TOTAL metric - this should never happen")
});

static ISTIO_OBJECTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "oneagent_operator_istio_objects_total",
            "Total number of Istio objects created or deleted",
        ),
        &["kind", "operation"],
    )
    .expect("Failed to create ISTIO_OBJECTS_TOTAL metric - this should never happen")
});

static WORKLOAD_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "oneagent_operator_workload_operations_total",
            "Total number of DaemonSet creates and updates",
        ),
        &["operation"],
    )
    .expect("Failed to create WORKLOAD_OPERATIONS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("oneagent_operator_requeues_total", "Total number of requeues"),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(RATE_LIMITED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOKEN_PROBES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PODS_REPLACED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ROLLOUT_TIMEOUTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ISTIO_OBJECTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKLOAD_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_rate_limited() {
    RATE_LIMITED_TOTAL.inc();
}

pub fn increment_token_probes(token: &str, result: &str) {
    TOKEN_PROBES_TOTAL.with_label_values(&[token, result]).inc();
}

pub fn increment_pods_replaced() {
    PODS_REPLACED_TOTAL.inc();
}

pub fn increment_rollout_timeouts() {
    ROLLOUT_TIMEOUTS_TOTAL.inc();
}

pub fn increment_istio_objects(kind: &str, operation: &str) {
    ISTIO_OBJECTS_TOTAL.with_label_values(&[kind, operation]).inc();
}

pub fn increment_workload_operations(operation: &str) {
    WORKLOAD_OPERATIONS_TOTAL
        .with_label_values(&[operation])
        .inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
