//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `config_rollout_reconciliations_total` - Total number of convergence passes
//! - `config_rollout_reconciliation_errors_total` - Total number of failed passes
//! - `config_rollout_reconciliation_duration_seconds` - Duration of convergence passes
//! - `config_rollout_no_signal_total` - Passes that found no fingerprint-relevant content
//! - `config_rollout_workloads_patched_total{kind}` - Workloads whose marker was updated
//! - `config_rollout_workloads_unchanged_total{kind}` - Workloads already at the target fingerprint
//! - `config_rollout_redeliveries_total` - Triggers scheduled for redelivery after a failure

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "config_rollout_reconciliations_total",
        "Total number of convergence passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "config_rollout_reconciliation_errors_total",
        "Total number of failed convergence passes",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "config_rollout_reconciliation_duration_seconds",
            "Duration of convergence passes in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static NO_SIGNAL_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "config_rollout_no_signal_total",
        "Convergence passes that found no fingerprint-relevant content",
    )
    .expect("Failed to create NO_SIGNAL_TOTAL metric - this should never happen")
});

static WORKLOADS_PATCHED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "config_rollout_workloads_patched_total",
            "Workloads whose config-hash annotation was updated",
        ),
        &["kind"],
    )
    .expect("Failed to create WORKLOADS_PATCHED_TOTAL metric - this should never happen")
});

static WORKLOADS_UNCHANGED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "config_rollout_workloads_unchanged_total",
            "Workloads already carrying the target fingerprint",
        ),
        &["kind"],
    )
    .expect("Failed to create WORKLOADS_UNCHANGED_TOTAL metric - this should never happen")
});

static REDELIVERIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "config_rollout_redeliveries_total",
        "Triggers scheduled for redelivery after a failed pass",
    )
    .expect("Failed to create REDELIVERIES_TOTAL metric - this should never happen")
});

/// Register all metrics with the process registry
///
/// # Errors
///
/// Returns an error if a metric is registered twice
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(NO_SIGNAL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKLOADS_PATCHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKLOADS_UNCHANGED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REDELIVERIES_TOTAL.clone()))?;

    Ok(())
}

/// Snapshot of all registered metric families
#[must_use]
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_no_signal() {
    NO_SIGNAL_TOTAL.inc();
}

pub fn increment_workloads_patched(kind: &str) {
    WORKLOADS_PATCHED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_workloads_unchanged(kind: &str) {
    WORKLOADS_UNCHANGED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_redeliveries() {
    REDELIVERIES_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_counters_are_labelled_by_kind() {
        let before = WORKLOADS_PATCHED_TOTAL
            .with_label_values(&["StatefulSet"])
            .get();
        increment_workloads_patched("StatefulSet");
        assert_eq!(
            WORKLOADS_PATCHED_TOTAL
                .with_label_values(&["StatefulSet"])
                .get(),
            before + 1
        );
    }
}
