//! # Controller Configuration
//!
//! Validated settings, immutable for the process lifetime. Any error here is
//! fatal at startup; the controller never begins reconciling with a bad config.

use crate::config::args::{Args, LogFormat};
use crate::constants::FIELD_MANAGER;
use crate::controller::fingerprint::{ExclusionFilters, KeyFilter};
use crate::controller::reconciler::ConvergenceSettings;
use crate::controller::selector::{
    is_dns_subdomain, is_qualified_name, LabelSelector, SelectorError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config hash annotation key must not be empty")]
    EmptyAnnotationKey,
    #[error("invalid config hash annotation key {0:?}")]
    InvalidAnnotationKey(String),
    #[error("invalid label selector {selector:?}: {source}")]
    InvalidSelector {
        selector: String,
        #[source]
        source: SelectorError,
    },
    #[error("backoff must satisfy 1 <= min ({min}) <= max ({max})")]
    InvalidBackoff { min: u64, max: u64 },
    #[error("invalid leader election lease name {0:?}")]
    InvalidLeaseName(String),
}

/// Where and as whom to compete for the leader Lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    /// `None` uses the client's default namespace
    pub namespace: Option<String>,
    pub identity: String,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Shared by watch admission and listing
    pub selector: Arc<LabelSelector>,
    pub annotation_key: String,
    pub exclusions: ExclusionFilters,
    /// `None` watches every namespace
    pub namespace: Option<String>,
    pub metrics_bind_address: SocketAddr,
    pub health_probe_bind_address: SocketAddr,
    pub log_format: LogFormat,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    /// `None` runs without leader election
    pub leader_election: Option<LeaderElectionConfig>,
}

impl ControllerConfig {
    /// Settings handed to the convergence engine
    #[must_use]
    pub fn convergence_settings(&self) -> ConvergenceSettings {
        ConvergenceSettings::new(
            Arc::clone(&self.selector),
            self.annotation_key.clone(),
            self.exclusions.clone(),
        )
    }
}

impl TryFrom<Args> for ControllerConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let annotation_key = args.config_hash_annotation.trim().to_string();
        if annotation_key.is_empty() {
            return Err(ConfigError::EmptyAnnotationKey);
        }
        if !is_qualified_name(&annotation_key) {
            return Err(ConfigError::InvalidAnnotationKey(annotation_key));
        }

        let selector: LabelSelector =
            args.label_selector
                .parse()
                .map_err(|source| ConfigError::InvalidSelector {
                    selector: args.label_selector.clone(),
                    source,
                })?;

        if args.backoff_min_secs == 0 || args.backoff_min_secs > args.backoff_max_secs {
            return Err(ConfigError::InvalidBackoff {
                min: args.backoff_min_secs,
                max: args.backoff_max_secs,
            });
        }

        let namespace = non_empty(&args.namespace);

        let leader_election = leader_election_config(&args)?;

        Ok(Self {
            selector: Arc::new(selector),
            annotation_key,
            exclusions: ExclusionFilters::new(
                KeyFilter::parse(&args.ignore_configmap_keys),
                KeyFilter::parse(&args.ignore_secret_keys),
            ),
            namespace,
            metrics_bind_address: args.metrics_bind_address,
            health_probe_bind_address: args.health_probe_bind_address,
            log_format: args.log_format,
            backoff_min_secs: args.backoff_min_secs,
            backoff_max_secs: args.backoff_max_secs,
            leader_election,
        })
    }
}

fn leader_election_config(args: &Args) -> Result<Option<LeaderElectionConfig>, ConfigError> {
    if !args.leader_elect {
        return Ok(None);
    }
    let lease_name = args.leader_election_id.trim().to_string();
    if !is_dns_subdomain(&lease_name) {
        return Err(ConfigError::InvalidLeaseName(lease_name));
    }
    let identity = non_empty(&args.leader_election_identity)
        .or_else(|| std::env::var("HOSTNAME").ok().as_deref().and_then(non_empty))
        .unwrap_or_else(|| format!("{FIELD_MANAGER}-{}", std::process::id()));
    Ok(Some(LeaderElectionConfig {
        lease_name,
        namespace: non_empty(&args.leader_election_namespace),
        identity,
    }))
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
