//! # Reconciler
//!
//! The convergence engine. One pass, for one namespace:
//!
//! 1. Probe the triggering object (best effort, for logging)
//! 2. List ConfigMaps and Secrets matching the selector
//! 3. Compute the aggregate fingerprint; stop when there is no signal
//! 4. For every workload kind, set the fingerprint annotation on each
//!    matching workload that does not already carry it
//!
//! Passes never retry. Errors go back to the caller, which owns redelivery.

pub mod patch;
pub mod reconcile;
pub mod types;

pub use patch::apply_fingerprint;
pub use reconcile::reconcile;
pub use types::{
    BackoffState, ConvergenceError, ConvergenceOutcome, ConvergenceSettings, Reconciler,
};
