//! # Configuration
//!
//! - `args`: command-line flags with environment-variable fallbacks
//! - `controller`: the validated, immutable [`ControllerConfig`]

pub mod args;
pub mod controller;

pub use args::{Args, LogFormat};
pub use controller::{ConfigError, ControllerConfig, LeaderElectionConfig};
