//! # Object Store
//!
//! The seam between the convergence engine and the Kubernetes API.
//!
//! - `kubernetes`: [`KubeStore`], backed by `kube::Api`
//! - `patch`: JSON merge-patch diffs between a snapshot and a modified copy
//!
//! Every error is returned to the caller; nothing here retries.

pub mod kubernetes;
pub mod patch;

use crate::controller::model::{ConfigSource, SourceKind, Workload, WorkloadKind};
use crate::controller::selector::LabelSelector;
use async_trait::async_trait;
use thiserror::Error;

pub use kubernetes::KubeStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The object changed between read and write; a fresh pass will retry
    #[error("{kind} {namespace}/{name} changed since it was read (precondition failed)")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("failed to {operation} {kind} in namespace {namespace}: {source}")]
    Api {
        operation: &'static str,
        kind: String,
        namespace: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to encode {kind} {namespace}/{name}: {source}")]
    Encode {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },
    /// For [`ObjectStore`] implementations that are not backed by a
    /// `kube::Client` (caches, fakes); [`KubeStore`] reports transport
    /// failures as [`StoreError::Api`].
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the failure is expected to clear on its own (conflicts,
    /// throttling, server and transport errors). Anything else usually needs
    /// an operator, such as missing RBAC. Both kinds are redelivered; this
    /// only decides how loudly the failure is reported.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Conflict { .. } | StoreError::Unavailable(_) => true,
            StoreError::Api { source, .. } => match source {
                kube::Error::Api(response) => {
                    response.code == 409 || response.code == 429 || response.code >= 500
                }
                _ => true,
            },
            StoreError::Encode { .. } => false,
        }
    }
}

/// Reads and conditional writes against the object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List sources of one kind in a namespace. Implementations may filter
    /// server-side with `selector`; callers still evaluate it per object.
    async fn list_sources(
        &self,
        kind: SourceKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ConfigSource>, StoreError>;

    /// List workloads of one kind in a namespace
    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Workload>, StoreError>;

    /// Best-effort existence probe of a source by name, trying ConfigMaps
    /// first. Not-found is `Ok(None)`.
    async fn probe_source(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SourceKind>, StoreError>;

    /// Write the difference between `original` and `modified`, conditional
    /// on `original` still being the current state
    async fn patch_workload(
        &self,
        original: &Workload,
        modified: &Workload,
    ) -> Result<(), StoreError>;
}
