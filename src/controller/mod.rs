//! # Controller
//!
//! Core controller modules for the Config Rollout Controller.
//!
//! - `backoff`: Fibonacci backoff for redelivering failed triggers
//! - `fingerprint`: Key filtering, per-source and aggregate fingerprints
//! - `model`: Source, workload and trigger snapshots
//! - `reconciler`: The convergence engine and patch applier
//! - `selector`: Typed label selectors
//! - `server`: HTTP server for metrics and health checks
//! - `store`: Object store seam and its Kubernetes implementation

pub mod backoff;
pub mod fingerprint;
pub mod model;
pub mod reconciler;
pub mod selector;
pub mod server;
pub mod store;
