//! Common test utilities
//!
//! An in-memory [`ObjectStore`] that behaves like the API server for the
//! parts the convergence engine relies on: namespace and label filtering on
//! lists, and `resourceVersion` preconditions on patches.

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use async_trait::async_trait;
use config_rollout_controller::controller::store::patch::merge_patch_diff;
use config_rollout_controller::prelude::*;
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "apps";
pub const ANNOTATION: &str = "synapse.gen0sec.com/config-hash";
pub const SELECTOR: &str = "app.kubernetes.io/name=synapse";

pub fn product_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "app.kubernetes.io/name".to_string(),
        "synapse".to_string(),
    )])
}

/// One recorded patch request
#[derive(Debug, Clone, PartialEq)]
pub struct PatchCall {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub patch: serde_json::Value,
}

#[derive(Debug, Default)]
struct State {
    sources: Vec<ConfigSource>,
    workloads: Vec<Workload>,
    patches: Vec<PatchCall>,
    list_selectors: Vec<String>,
    conflict_on: Option<String>,
    delete_before_patch: Option<String>,
    fail_lists: bool,
    cancel_after_patches: Option<(usize, CancellationToken)>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    /// Return every object of the kind regardless of selector, like a store
    /// without server-side filtering
    ignore_selector: bool,
    /// Yield to the scheduler inside every call, so that concurrent callers
    /// interleave instead of running to completion one after the other
    yield_in_calls: bool,
    calls_in_flight: Arc<AtomicUsize>,
    peak_calls_in_flight: Arc<AtomicUsize>,
}

/// Marks one store call as in flight until dropped
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_server_side_filtering() -> Self {
        Self {
            ignore_selector: true,
            ..Self::default()
        }
    }

    pub fn yielding() -> Self {
        Self {
            yield_in_calls: true,
            ..Self::default()
        }
    }

    /// Most store calls that were ever running at the same time
    pub fn peak_calls_in_flight(&self) -> usize {
        self.peak_calls_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight {
        let now = self.calls_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_calls_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&self.calls_in_flight));
        if self.yield_in_calls {
            tokio::task::yield_now().await;
        }
        guard
    }

    pub fn add_source(&self, source: ConfigSource) {
        let mut state = self.state.lock().unwrap();
        state
            .sources
            .retain(|s| !(s.namespace == source.namespace && s.name == source.name && s.kind == source.kind));
        state.sources.push(source);
    }

    pub fn remove_source(&self, kind: SourceKind, name: &str) {
        self.state
            .lock()
            .unwrap()
            .sources
            .retain(|s| !(s.kind == kind && s.name == name));
    }

    pub fn add_workload(&self, workload: Workload) {
        self.state.lock().unwrap().workloads.push(workload);
    }

    pub fn workload(&self, kind: WorkloadKind, name: &str) -> Workload {
        self.state
            .lock()
            .unwrap()
            .workloads
            .iter()
            .find(|w| w.kind() == kind && w.name() == name)
            .cloned()
            .unwrap()
    }

    pub fn annotation(&self, kind: WorkloadKind, name: &str) -> Option<String> {
        self.workload(kind, name)
            .template_annotation(ANNOTATION)
            .map(str::to_string)
    }

    /// Simulate a concurrent writer touching the workload
    pub fn bump_resource_version(&self, kind: WorkloadKind, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(workload) = state
            .workloads
            .iter_mut()
            .find(|w| w.kind() == kind && w.name() == name)
        {
            bump(workload);
        }
    }

    pub fn patches(&self) -> Vec<PatchCall> {
        self.state.lock().unwrap().patches.clone()
    }

    pub fn list_selectors(&self) -> Vec<String> {
        self.state.lock().unwrap().list_selectors.clone()
    }

    pub fn conflict_on(&self, name: &str) {
        self.state.lock().unwrap().conflict_on = Some(name.to_string());
    }

    /// Remove the workload right before its patch arrives, as if it were
    /// deleted between list and write
    pub fn delete_before_patch(&self, name: &str) {
        self.state.lock().unwrap().delete_before_patch = Some(name.to_string());
    }

    pub fn fail_lists(&self, fail: bool) {
        self.state.lock().unwrap().fail_lists = fail;
    }

    pub fn cancel_after_patches(&self, count: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after_patches = Some((count, token));
    }

    fn visible(&self, selector: &LabelSelector, namespace: &str, object_namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        object_namespace == namespace && (self.ignore_selector || selector.matches(labels))
    }
}

fn bump(workload: &mut Workload) {
    let metadata = workload.metadata_mut();
    let next = metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    metadata.resource_version = Some(next.to_string());
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_sources(
        &self,
        kind: SourceKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ConfigSource>, StoreError> {
        let _call = self.enter().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_lists {
            return Err(StoreError::Unavailable("list refused".to_string()));
        }
        state.list_selectors.push(selector.to_string());
        Ok(state
            .sources
            .iter()
            .filter(|s| s.kind == kind && self.visible(selector, namespace, &s.namespace, &s.labels))
            .cloned()
            .collect())
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Workload>, StoreError> {
        let _call = self.enter().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_lists {
            return Err(StoreError::Unavailable("list refused".to_string()));
        }
        state.list_selectors.push(selector.to_string());
        let empty = BTreeMap::new();
        Ok(state
            .workloads
            .iter()
            .filter(|w| {
                w.kind() == kind
                    && self.visible(
                        selector,
                        namespace,
                        w.namespace(),
                        w.metadata().labels.as_ref().unwrap_or(&empty),
                    )
            })
            .cloned()
            .collect())
    }

    async fn probe_source(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SourceKind>, StoreError> {
        let _call = self.enter().await;
        let state = self.state.lock().unwrap();
        let found = |kind| {
            state
                .sources
                .iter()
                .any(|s| s.kind == kind && s.namespace == namespace && s.name == name)
        };
        Ok(SourceKind::ALL.into_iter().find(|kind| found(*kind)))
    }

    async fn patch_workload(
        &self,
        original: &Workload,
        modified: &Workload,
    ) -> Result<(), StoreError> {
        let _call = self.enter().await;
        let mut state = self.state.lock().unwrap();
        if state.delete_before_patch.as_deref() == Some(original.name()) {
            state.delete_before_patch = None;
            state.workloads.retain(|w| !(w.kind() == original.kind() && w.name() == original.name()));
        }
        let conflict = || StoreError::Conflict {
            kind: original.kind().to_string(),
            namespace: original.namespace().to_string(),
            name: original.name().to_string(),
        };
        if state.conflict_on.as_deref() == Some(original.name()) {
            return Err(conflict());
        }

        let index = state
            .workloads
            .iter()
            .position(|w| {
                w.kind() == original.kind()
                    && w.namespace() == original.namespace()
                    && w.name() == original.name()
            })
            .ok_or_else(|| not_found("patch", original))?;
        if state.workloads[index].resource_version() != original.resource_version() {
            return Err(conflict());
        }

        let patch = merge_patch_diff(&original.to_json().unwrap(), &modified.to_json().unwrap());
        state.patches.push(PatchCall {
            kind: original.kind(),
            namespace: original.namespace().to_string(),
            name: original.name().to_string(),
            patch,
        });

        let mut stored = modified.clone();
        bump(&mut stored);
        state.workloads[index] = stored;

        let patched = state.patches.len();
        if let Some((count, token)) = &state.cancel_after_patches {
            if patched >= *count {
                token.cancel();
            }
        }
        Ok(())
    }
}

/// What `KubeStore` returns for a write to a workload that no longer exists
pub fn not_found(operation: &'static str, workload: &Workload) -> StoreError {
    StoreError::Api {
        operation,
        kind: workload.kind().to_string(),
        namespace: workload.namespace().to_string(),
        source: api_status(404),
    }
}

pub fn api_status(code: u16) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "test".to_string(),
        reason: "Test".to_string(),
        code,
    })
}

fn template(annotation: Option<&str>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(product_labels()),
            annotations: annotation
                .map(|value| BTreeMap::from([(ANNOTATION.to_string(), value.to_string())])),
            ..Default::default()
        }),
        spec: None,
    }
}

fn metadata(name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        labels: Some(labels),
        resource_version: Some("1".to_string()),
        ..Default::default()
    }
}

pub fn deployment(name: &str, annotation: Option<&str>) -> Workload {
    deployment_with_labels(name, annotation, product_labels())
}

pub fn deployment_with_labels(
    name: &str,
    annotation: Option<&str>,
    labels: BTreeMap<String, String>,
) -> Workload {
    Workload::Deployment(Deployment {
        metadata: metadata(name, labels),
        spec: Some(DeploymentSpec {
            template: template(annotation),
            ..Default::default()
        }),
        status: None,
    })
}

pub fn daemon_set(name: &str, annotation: Option<&str>) -> Workload {
    Workload::DaemonSet(DaemonSet {
        metadata: metadata(name, product_labels()),
        spec: Some(DaemonSetSpec {
            template: template(annotation),
            ..Default::default()
        }),
        status: None,
    })
}

pub fn stateful_set(name: &str, annotation: Option<&str>) -> Workload {
    Workload::StatefulSet(StatefulSet {
        metadata: metadata(name, product_labels()),
        spec: Some(StatefulSetSpec {
            template: template(annotation),
            ..Default::default()
        }),
        status: None,
    })
}

pub fn config_map(name: &str) -> ConfigSource {
    let mut source = ConfigSource::new(NAMESPACE, name, SourceKind::Plain);
    source.labels = product_labels();
    source
}

pub fn secret(name: &str) -> ConfigSource {
    let mut source = ConfigSource::new(NAMESPACE, name, SourceKind::Sensitive);
    source.labels = product_labels();
    source
}

pub fn settings() -> ConvergenceSettings {
    ConvergenceSettings::new(
        Arc::new(SELECTOR.parse().unwrap()),
        ANNOTATION,
        ExclusionFilters::new(KeyFilter::parse("upstreams.yaml"), KeyFilter::default()),
    )
}

pub fn reconciler(store: &MemoryStore) -> Reconciler {
    Reconciler::new(Arc::new(store.clone()), settings())
}
