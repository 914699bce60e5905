//! # Error Policy
//!
//! Decides what happens to a trigger whose pass failed. Every store failure
//! is redelivered after a per-namespace Fibonacci backoff, since an aborted
//! pass may have left workloads on a stale fingerprint. Cancelled passes are
//! not redelivered.

use crate::controller::model::ReconciliationTrigger;
use crate::controller::reconciler::{ConvergenceError, Reconciler};
use crate::observability;
use std::time::Duration;
use tracing::{error, info, warn};

/// Record the failure and return the redelivery delay, if any
pub fn handle_reconciliation_error(
    trigger: &ReconciliationTrigger,
    error: &ConvergenceError,
    ctx: &Reconciler,
) -> Option<Duration> {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        namespace = %trigger.namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Convergence pass for {} failed: {}", trigger, error);
    observability::metrics::increment_reconciliation_errors();

    if !error.is_retryable() {
        info!("Not redelivering {}; the controller is shutting down", trigger);
        return None;
    }
    if let ConvergenceError::Store(store_error) = error {
        if !store_error.is_transient() {
            warn!(
                "Failure for {} is unlikely to clear without intervention; redelivering with backoff",
                trigger
            );
        }
    }

    let (delay, error_count) = ctx.next_backoff(&trigger.namespace);
    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    info!(
        "Redelivering {} in {}s at {} (error count: {})",
        trigger,
        delay.as_secs(),
        next_trigger_time.to_rfc3339(),
        error_count
    );

    observability::metrics::increment_redeliveries();
    Some(delay)
}

/// A pass succeeded; the namespace's backoff starts over
pub fn handle_reconciliation_success(trigger: &ReconciliationTrigger, ctx: &Reconciler) {
    ctx.reset_backoff(&trigger.namespace);
}

/// Watch errors are logged; the watcher's own backoff restarts the stream
pub fn handle_watch_stream_error(kind: &str, error: &kube_runtime::watcher::Error) {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        kind = kind,
        error = %error
    );
    let _error_guard = error_span.enter();

    warn!("{} watch error, stream will be retried: {}", kind, error);
}
