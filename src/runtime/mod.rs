//! # Runtime
//!
//! Everything between the process entry point and the convergence engine.
//!
//! - `initialization`: rustls, tracing, metrics, HTTP servers, Kubernetes client
//! - `watch_loop`: turns ConfigMap/Secret watch events into convergence passes
//! - `error_policy`: failed-pass redelivery and backoff
//! - `leader_election`: Lease-based election for `--leader-elect`

pub mod error_policy;
pub mod initialization;
pub mod leader_election;
pub mod watch_loop;
