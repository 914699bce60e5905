//! # Kubernetes Store
//!
//! [`ObjectStore`] over the Kubernetes API. Lists use the label selector as
//! a server-side filter; the engine re-evaluates it per object.

use super::patch::{is_noop, merge_patch_diff, with_resource_version};
use super::{ObjectStore, StoreError};
use crate::constants::FIELD_MANAGER;
use crate::controller::model::{ConfigSource, SourceKind, Workload, WorkloadKind};
use crate::controller::selector::LabelSelector;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn list_params(selector: &LabelSelector) -> ListParams {
        if selector.is_everything() {
            ListParams::default()
        } else {
            ListParams::default().labels_from(selector.as_selector())
        }
    }

    async fn list<K>(
        &self,
        kind: &str,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<K>, StoreError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&Self::list_params(selector))
            .await
            .map_err(|source| StoreError::Api {
                operation: "list",
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                source,
            })?;
        Ok(list.items)
    }

    async fn exists<K>(&self, kind: &str, namespace: &str, name: &str) -> Result<bool, StoreError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let found = api
            .get_opt(name)
            .await
            .map_err(|source| StoreError::Api {
                operation: "get",
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                source,
            })?;
        Ok(found.is_some())
    }

    async fn patch<K>(&self, workload: &Workload, patch: serde_json::Value) -> Result<(), StoreError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), workload.namespace());
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match api.patch(workload.name(), &params, &Patch::Merge(&patch)).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 => Err(StoreError::Conflict {
                kind: workload.kind().to_string(),
                namespace: workload.namespace().to_string(),
                name: workload.name().to_string(),
            }),
            Err(source) => Err(StoreError::Api {
                operation: "patch",
                kind: workload.kind().to_string(),
                namespace: workload.namespace().to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn list_sources(
        &self,
        kind: SourceKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ConfigSource>, StoreError> {
        let sources = match kind {
            SourceKind::Plain => self
                .list::<ConfigMap>(kind.as_str(), namespace, selector)
                .await?
                .iter()
                .map(ConfigSource::from_config_map)
                .collect(),
            SourceKind::Sensitive => self
                .list::<Secret>(kind.as_str(), namespace, selector)
                .await?
                .iter()
                .map(ConfigSource::from_secret)
                .collect(),
        };
        Ok(sources)
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Workload>, StoreError> {
        let workloads = match kind {
            WorkloadKind::Deployment => self
                .list::<Deployment>(kind.as_str(), namespace, selector)
                .await?
                .into_iter()
                .map(Workload::from)
                .collect(),
            WorkloadKind::DaemonSet => self
                .list::<DaemonSet>(kind.as_str(), namespace, selector)
                .await?
                .into_iter()
                .map(Workload::from)
                .collect(),
            WorkloadKind::StatefulSet => self
                .list::<StatefulSet>(kind.as_str(), namespace, selector)
                .await?
                .into_iter()
                .map(Workload::from)
                .collect(),
        };
        Ok(workloads)
    }

    async fn probe_source(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SourceKind>, StoreError> {
        if self
            .exists::<ConfigMap>(SourceKind::Plain.as_str(), namespace, name)
            .await?
        {
            return Ok(Some(SourceKind::Plain));
        }
        if self
            .exists::<Secret>(SourceKind::Sensitive.as_str(), namespace, name)
            .await?
        {
            return Ok(Some(SourceKind::Sensitive));
        }
        Ok(None)
    }

    async fn patch_workload(
        &self,
        original: &Workload,
        modified: &Workload,
    ) -> Result<(), StoreError> {
        let encode = |source| StoreError::Encode {
            kind: original.kind().to_string(),
            namespace: original.namespace().to_string(),
            name: original.name().to_string(),
            source,
        };
        let diff = merge_patch_diff(
            &original.to_json().map_err(encode)?,
            &modified.to_json().map_err(encode)?,
        );
        if is_noop(&diff) {
            debug!("{} unchanged, skipping patch", original);
            return Ok(());
        }
        let patch = with_resource_version(diff, original.resource_version());

        match original.kind() {
            WorkloadKind::Deployment => self.patch::<Deployment>(original, patch).await,
            WorkloadKind::DaemonSet => self.patch::<DaemonSet>(original, patch).await,
            WorkloadKind::StatefulSet => self.patch::<StatefulSet>(original, patch).await,
        }
    }
}
