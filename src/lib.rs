//! Config Rollout Controller Library
//!
//! Keeps Deployments, DaemonSets and StatefulSets in sync with the ConfigMaps
//! and Secrets they consume. Every watched source is fingerprinted, the
//! fingerprints of a namespace are combined, and the result is written to a
//! pod-template annotation so that a content change rolls the workloads.
//!
//! ## Quick Start
//!
//! ```rust
//! use config_rollout_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod prelude;
pub mod runtime;
