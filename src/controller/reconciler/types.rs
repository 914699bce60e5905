//! # Types
//!
//! Core types for the convergence engine.

use crate::constants::{DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::fingerprint::{ExclusionFilters, Fingerprint};
use crate::controller::model::WorkloadKind;
use crate::controller::selector::LabelSelector;
use crate::controller::store::{ObjectStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Error)]
pub enum ConvergenceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("convergence pass for namespace {namespace} was cancelled")]
    Cancelled { namespace: String },
}

impl ConvergenceError {
    /// Whether the trigger is redelivered. Every store failure is, so
    /// workloads left behind by an aborted pass are still corrected; a
    /// cancelled pass belongs to a process that is shutting down.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ConvergenceError::Store(_) => true,
            ConvergenceError::Cancelled { .. } => false,
        }
    }
}

/// Result of a successful pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceOutcome {
    /// Nothing fingerprint-relevant in scope; no workload was touched
    NoSignal,
    Converged {
        fingerprint: Fingerprint,
        /// Workloads whose annotation was written
        patched: usize,
        /// Workloads already at the fingerprint
        unchanged: usize,
    },
}

impl ConvergenceOutcome {
    #[must_use]
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            ConvergenceOutcome::NoSignal => None,
            ConvergenceOutcome::Converged { fingerprint, .. } => Some(fingerprint),
        }
    }
}

/// Immutable inputs of every pass, fixed at startup
#[derive(Debug, Clone)]
pub struct ConvergenceSettings {
    /// Shared with the watch layer so admission and listing agree
    pub selector: Arc<LabelSelector>,
    pub annotation_key: String,
    pub exclusions: ExclusionFilters,
    pub workload_kinds: Vec<WorkloadKind>,
}

impl ConvergenceSettings {
    #[must_use]
    pub fn new(
        selector: Arc<LabelSelector>,
        annotation_key: impl Into<String>,
        exclusions: ExclusionFilters,
    ) -> Self {
        Self {
            selector,
            annotation_key: annotation_key.into(),
            exclusions,
            workload_kinds: WorkloadKind::ALL.to_vec(),
        }
    }
}

/// Redelivery backoff for one namespace
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ObjectStore>,
    pub settings: Arc<ConvergenceSettings>,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    // Keyed by namespace; owned by the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    // One pass per namespace at a time, even with concurrent callers
    pub scope_locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .field("backoff_min_secs", &self.backoff_min_secs)
            .field("backoff_max_secs", &self.backoff_max_secs)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, settings: ConvergenceSettings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            scope_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, min_secs: u64, max_secs: u64) -> Self {
        self.backoff_min_secs = min_secs;
        self.backoff_max_secs = max_secs;
        self
    }

    /// Get or create the pass lock for a namespace
    pub fn scope_lock(&self, namespace: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .scope_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Advance the namespace's backoff and return the next delay
    pub fn next_backoff(&self, namespace: &str) -> (std::time::Duration, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(namespace.to_string())
            .or_insert_with(|| BackoffState::new(self.backoff_min_secs, self.backoff_max_secs));
        state.increment_error();
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Forget the namespace's failures after a successful pass
    pub fn reset_backoff(&self, namespace: &str) {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(namespace);
    }

    /// Drop the namespace's pass lock unless another pass holds or awaits it
    pub fn release_scope_lock(&self, namespace: &str) {
        let mut locks = self
            .scope_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(namespace)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(namespace);
        }
    }

    /// Namespaces with outstanding failures
    #[must_use]
    pub fn tracked_backoffs(&self) -> usize {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Namespaces with a live pass lock
    #[must_use]
    pub fn tracked_scope_locks(&self) -> usize {
        self.scope_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
