//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! command-line flags or environment variables where applicable.

/// Default label selector identifying the managed product's sources and workloads
pub const DEFAULT_LABEL_SELECTOR: &str = "app.kubernetes.io/name=synapse";

/// Default pod-template annotation key holding the config fingerprint
pub const DEFAULT_CONFIG_HASH_ANNOTATION: &str = "synapse.gen0sec.com/config-hash";

/// Default comma-separated ConfigMap keys left out of the fingerprint
pub const DEFAULT_IGNORED_CONFIGMAP_KEYS: &str = "upstreams.yaml";

/// Default comma-separated Secret keys left out of the fingerprint
pub const DEFAULT_IGNORED_SECRET_KEYS: &str = "";

/// Default bind address for the Prometheus metrics endpoint
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default bind address for the liveness/readiness probes
pub const DEFAULT_HEALTH_PROBE_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default minimum redelivery backoff after a failed pass (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 1;

/// Default maximum redelivery backoff after a failed pass (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Field manager recorded on every workload patch
pub const FIELD_MANAGER: &str = "config-rollout-controller";

/// Canonical identity prefix for ConfigMap sources in the aggregate fingerprint
pub const CONFIGMAP_IDENTITY_PREFIX: &str = "configmap";

/// Canonical identity prefix for Secret sources in the aggregate fingerprint
pub const SECRET_IDENTITY_PREFIX: &str = "secret";

/// Default name of the Lease that elects the active replica
pub const DEFAULT_LEADER_ELECTION_ID: &str = "86a223f3.synapse.gen0sec.com";

/// How long a Lease stays valid without renewal (seconds)
pub const LEASE_DURATION_SECS: u64 = 30;

/// How often the leader renews its Lease (seconds)
pub const LEASE_RENEW_INTERVAL_SECS: u64 = 10;

/// How often a standby replica retries acquisition (seconds)
pub const LEASE_RETRY_INTERVAL_SECS: u64 = 5;
