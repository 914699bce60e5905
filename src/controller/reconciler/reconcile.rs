//! # Convergence Pass
//!
//! Collect, fingerprint, propagate. Every pass recomputes from scratch, so
//! duplicate and out-of-order triggers are harmless.

use crate::controller::fingerprint::{aggregate_fingerprint, Fingerprint};
use crate::controller::model::{ConfigSource, ReconciliationTrigger, SourceKind, WorkloadKind};
use crate::controller::reconciler::patch::apply_fingerprint;
use crate::controller::reconciler::types::{ConvergenceError, ConvergenceOutcome, Reconciler};
use crate::observability;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

/// Run one convergence pass for the trigger's namespace.
///
/// Passes on the same namespace are serialized. `cancel` is checked between
/// steps; a cancelled pass returns [`ConvergenceError::Cancelled`] and leaves
/// already-patched workloads in place.
///
/// # Errors
///
/// The first store error aborts the pass and is returned unchanged.
pub async fn reconcile(
    ctx: &Reconciler,
    trigger: &ReconciliationTrigger,
    cancel: &CancellationToken,
) -> Result<ConvergenceOutcome, ConvergenceError> {
    let span = tracing::info_span!(
        "controller.reconcile",
        namespace = %trigger.namespace,
        trigger = %trigger,
    );
    async move {
        let lock = ctx.scope_lock(&trigger.namespace);
        let result = {
            let _guard = lock.lock().await;

            let start = Instant::now();
            observability::metrics::increment_reconciliations();
            let result = reconcile_internal(ctx, trigger, cancel).await;
            observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
            result
        };
        drop(lock);
        ctx.release_scope_lock(&trigger.namespace);
        result
    }
    .instrument(span)
    .await
}

async fn reconcile_internal(
    ctx: &Reconciler,
    trigger: &ReconciliationTrigger,
    cancel: &CancellationToken,
) -> Result<ConvergenceOutcome, ConvergenceError> {
    let namespace = trigger.namespace.as_str();
    let settings = &ctx.settings;

    if let Some(object) = &trigger.object {
        match ctx.store.probe_source(namespace, &object.name).await? {
            Some(kind) => debug!("Triggered by {} {}/{}", kind, namespace, object.name),
            None => debug!(
                "Triggering object {}/{} no longer exists",
                namespace, object.name
            ),
        }
    }

    let sources = collect_sources(ctx, namespace).await?;
    check_cancelled(cancel, namespace)?;

    let fingerprint = aggregate_fingerprint(&sources, &settings.exclusions);
    check_cancelled(cancel, namespace)?;

    if fingerprint.is_empty() {
        info!(
            "No config sources with fingerprint-relevant content in {}, skipping rollout",
            namespace
        );
        observability::metrics::increment_no_signal();
        return Ok(ConvergenceOutcome::NoSignal);
    }
    debug!(
        "Aggregate fingerprint {} over {} source(s)",
        fingerprint,
        sources.len()
    );

    let mut patched = 0;
    let mut unchanged = 0;
    for kind in &settings.workload_kinds {
        check_cancelled(cancel, namespace)?;
        let (kind_patched, kind_unchanged) =
            propagate(ctx, *kind, namespace, &fingerprint, cancel).await?;
        patched += kind_patched;
        unchanged += kind_unchanged;
    }

    Ok(ConvergenceOutcome::Converged {
        fingerprint,
        patched,
        unchanged,
    })
}

/// Sources of both kinds in scope; the selector is re-checked per object
/// because the store's own filtering is not trusted to match it exactly.
async fn collect_sources(
    ctx: &Reconciler,
    namespace: &str,
) -> Result<Vec<ConfigSource>, ConvergenceError> {
    let selector = ctx.settings.selector.as_ref();
    let mut sources = Vec::new();
    for kind in SourceKind::ALL {
        let listed = ctx.store.list_sources(kind, namespace, selector).await?;
        sources.extend(
            listed
                .into_iter()
                .filter(|source| selector.matches(source)),
        );
    }
    Ok(sources)
}

async fn propagate(
    ctx: &Reconciler,
    kind: WorkloadKind,
    namespace: &str,
    fingerprint: &Fingerprint,
    cancel: &CancellationToken,
) -> Result<(usize, usize), ConvergenceError> {
    let selector = ctx.settings.selector.as_ref();
    let key = ctx.settings.annotation_key.as_str();
    let workloads = ctx.store.list_workloads(kind, namespace, selector).await?;

    let mut patched = 0;
    let mut unchanged = 0;
    for workload in workloads.iter().filter(|workload| selector.matches(*workload)) {
        check_cancelled(cancel, namespace)?;
        match apply_fingerprint(ctx.store.as_ref(), workload, key, fingerprint).await {
            Ok(true) => {
                info!("Updated {} with config hash {}", workload, fingerprint);
                observability::metrics::increment_workloads_patched(kind.as_str());
                patched += 1;
            }
            Ok(false) => {
                debug!("{} already at config hash {}", workload, fingerprint);
                observability::metrics::increment_workloads_unchanged(kind.as_str());
                unchanged += 1;
            }
            Err(e) => {
                error!("Failed to patch {}: {}", workload, e);
                return Err(e.into());
            }
        }
    }
    Ok((patched, unchanged))
}

fn check_cancelled(cancel: &CancellationToken, namespace: &str) -> Result<(), ConvergenceError> {
    if cancel.is_cancelled() {
        return Err(ConvergenceError::Cancelled {
            namespace: namespace.to_string(),
        });
    }
    Ok(())
}
