//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use config_rollout_controller::prelude::*;
//! ```

// Model types - what a pass reads and writes
pub use crate::controller::model::{
    ConfigSource, EntryValue, ObjectKey, ReconciliationTrigger, SourceKind, Workload,
    WorkloadKind,
};

// Fingerprinting
pub use crate::controller::fingerprint::{
    aggregate_fingerprint, fingerprint_source, ExclusionFilters, Fingerprint, KeyFilter,
};

// Selectors
pub use crate::controller::selector::{LabelSelector, Labeled, SelectorError};

// Object store seam
pub use crate::controller::store::{KubeStore, ObjectStore, StoreError};

// Convergence engine
pub use crate::controller::reconciler::{
    apply_fingerprint, reconcile, ConvergenceError, ConvergenceOutcome, ConvergenceSettings,
    Reconciler,
};

// Config types
pub use crate::config::{Args, ConfigError, ControllerConfig, LeaderElectionConfig, LogFormat};
