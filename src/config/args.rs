//! # Command-Line Arguments

use crate::constants::{
    DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS, DEFAULT_CONFIG_HASH_ANNOTATION,
    DEFAULT_HEALTH_PROBE_BIND_ADDRESS, DEFAULT_IGNORED_CONFIGMAP_KEYS,
    DEFAULT_IGNORED_SECRET_KEYS, DEFAULT_LABEL_SELECTOR, DEFAULT_LEADER_ELECTION_ID,
    DEFAULT_METRICS_BIND_ADDRESS,
};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;

/// Rolls Deployments, DaemonSets and StatefulSets when their ConfigMaps or Secrets change
#[derive(Debug, Clone, Parser)]
#[command(name = "config-rollout-controller", version, about, long_about = None)]
pub struct Args {
    /// Label selector for the ConfigMaps, Secrets and workloads to manage
    #[arg(long, env = "LABEL_SELECTOR", default_value = DEFAULT_LABEL_SELECTOR)]
    pub label_selector: String,

    /// Pod-template annotation holding the config fingerprint
    #[arg(long, env = "CONFIG_HASH_ANNOTATION", default_value = DEFAULT_CONFIG_HASH_ANNOTATION)]
    pub config_hash_annotation: String,

    /// Comma-separated ConfigMap keys left out of the fingerprint
    #[arg(long, env = "IGNORE_CONFIGMAP_KEYS", default_value = DEFAULT_IGNORED_CONFIGMAP_KEYS)]
    pub ignore_configmap_keys: String,

    /// Comma-separated Secret keys left out of the fingerprint
    #[arg(long, env = "IGNORE_SECRET_KEYS", default_value = DEFAULT_IGNORED_SECRET_KEYS)]
    pub ignore_secret_keys: String,

    /// Restrict the controller to one namespace (all namespaces when empty)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    pub namespace: String,

    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    pub metrics_bind_address: SocketAddr,

    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = DEFAULT_HEALTH_PROBE_BIND_ADDRESS)]
    pub health_probe_bind_address: SocketAddr,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// First redelivery delay after a failed pass (seconds)
    #[arg(long, env = "BACKOFF_MIN_SECS", default_value_t = DEFAULT_BACKOFF_MIN_SECS)]
    pub backoff_min_secs: u64,

    /// Upper bound on the redelivery delay (seconds)
    #[arg(long, env = "BACKOFF_MAX_SECS", default_value_t = DEFAULT_BACKOFF_MAX_SECS)]
    pub backoff_max_secs: u64,

    /// Only reconcile while holding the leader Lease, so that one replica is active
    #[arg(long, env = "LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,

    /// Name of the leader Lease
    #[arg(long, env = "LEADER_ELECTION_ID", default_value = DEFAULT_LEADER_ELECTION_ID)]
    pub leader_election_id: String,

    /// Namespace of the leader Lease (the client's default namespace when empty)
    #[arg(long, env = "POD_NAMESPACE", default_value = "")]
    pub leader_election_namespace: String,

    /// Holder identity written to the Lease (falls back to `HOSTNAME`)
    #[arg(long, env = "POD_NAME", default_value = "")]
    pub leader_election_identity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
