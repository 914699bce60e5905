//! # Model
//!
//! Snapshots of the objects a convergence pass reads and writes.
//!
//! - [`ConfigSource`]: a ConfigMap (plain) or Secret (sensitive) reduced to its
//!   identity, labels and entries
//! - [`Workload`]: a Deployment, DaemonSet or StatefulSet whose pod template
//!   carries the restart-marker annotation
//! - [`ReconciliationTrigger`]: the namespace (and optionally the object) a
//!   change was observed in

use crate::constants::{CONFIGMAP_IDENTITY_PREFIX, SECRET_IDENTITY_PREFIX};
use crate::controller::selector::Labeled;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Kind of configuration source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// ConfigMap: text and binary entries
    Plain,
    /// Secret: opaque entries only
    Sensitive,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Plain, SourceKind::Sensitive];

    /// Kubernetes kind name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Plain => "ConfigMap",
            SourceKind::Sensitive => "Secret",
        }
    }

    /// Prefix of the canonical identity used when aggregating fingerprints,
    /// so same-named sources of different kinds never collide
    #[must_use]
    pub fn identity_prefix(&self) -> &'static str {
        match self {
            SourceKind::Plain => CONFIGMAP_IDENTITY_PREFIX,
            SourceKind::Sensitive => SECRET_IDENTITY_PREFIX,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of one configuration entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValue {
    Text(String),
    Binary(Vec<u8>),
}

impl EntryValue {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            EntryValue::Text(text) => text.as_bytes(),
            EntryValue::Binary(bytes) => bytes,
        }
    }
}

/// Read-only snapshot of a ConfigMap or Secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub namespace: String,
    pub name: String,
    pub kind: SourceKind,
    pub labels: BTreeMap<String, String>,
    pub entries: HashMap<String, EntryValue>,
}

impl ConfigSource {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
            labels: BTreeMap::new(),
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), EntryValue::Text(value.into()));
        self
    }

    #[must_use]
    pub fn with_binary(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.entries
            .insert(key.into(), EntryValue::Binary(value.into()));
        self
    }

    /// `configmap/<name>` or `secret/<name>`
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}/{}", self.kind.identity_prefix(), self.name)
    }

    /// Build a plain source from a ConfigMap. The API server rejects keys
    /// present in both `data` and `binaryData`.
    #[must_use]
    pub fn from_config_map(config_map: &ConfigMap) -> Self {
        let mut entries = HashMap::new();
        if let Some(data) = &config_map.data {
            for (key, value) in data {
                entries.insert(key.clone(), EntryValue::Text(value.clone()));
            }
        }
        if let Some(binary) = &config_map.binary_data {
            for (key, value) in binary {
                entries.insert(key.clone(), EntryValue::Binary(value.0.clone()));
            }
        }
        Self::from_parts(&config_map.metadata, SourceKind::Plain, entries)
    }

    /// Build a sensitive source from a Secret. `stringData` is write-only
    /// and never present on objects read back from the API server.
    #[must_use]
    pub fn from_secret(secret: &Secret) -> Self {
        let entries = secret
            .data
            .iter()
            .flatten()
            .map(|(key, value)| (key.clone(), EntryValue::Binary(value.0.clone())))
            .collect();
        Self::from_parts(&secret.metadata, SourceKind::Sensitive, entries)
    }

    fn from_parts(
        metadata: &ObjectMeta,
        kind: SourceKind,
        entries: HashMap<String, EntryValue>,
    ) -> Self {
        Self {
            namespace: metadata.namespace.clone().unwrap_or_default(),
            name: metadata.name.clone().unwrap_or_default(),
            kind,
            labels: metadata.labels.clone().unwrap_or_default(),
            entries,
        }
    }
}

impl Labeled for ConfigSource {
    fn label_set(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.labels)
    }
}

/// Supported workload kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 3] = [
        WorkloadKind::Deployment,
        WorkloadKind::DaemonSet,
        WorkloadKind::StatefulSet,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workload owning a pod template
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Deployment(Deployment),
    DaemonSet(DaemonSet),
    StatefulSet(StatefulSet),
}

// All three kinds share `metadata` and `spec.template`, but not a trait.
macro_rules! with_workload {
    ($workload:expr, $inner:ident => $body:expr) => {
        match $workload {
            Workload::Deployment($inner) => $body,
            Workload::DaemonSet($inner) => $body,
            Workload::StatefulSet($inner) => $body,
        }
    };
}

impl Workload {
    #[must_use]
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Workload::Deployment(_) => WorkloadKind::Deployment,
            Workload::DaemonSet(_) => WorkloadKind::DaemonSet,
            Workload::StatefulSet(_) => WorkloadKind::StatefulSet,
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &ObjectMeta {
        with_workload!(self, w => &w.metadata)
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        with_workload!(self, w => &mut w.metadata)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    /// Pod-template annotations, if the template has any
    #[must_use]
    pub fn template_annotations(&self) -> Option<&BTreeMap<String, String>> {
        with_workload!(self, w => w
            .spec
            .as_ref()
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|meta| meta.annotations.as_ref()))
    }

    #[must_use]
    pub fn template_annotation(&self, key: &str) -> Option<&str> {
        self.template_annotations()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    /// Set a pod-template annotation, creating the spec, template metadata
    /// and annotation map as needed
    pub fn set_template_annotation(&mut self, key: &str, value: &str) {
        with_workload!(self, w => {
            w.spec
                .get_or_insert_with(Default::default)
                .template
                .metadata
                .get_or_insert_with(Default::default)
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
        });
    }

    /// Serialized form used for merge-patch diffs
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be serialized
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        with_workload!(self, w => serde_json::to_value(w))
    }
}

impl From<Deployment> for Workload {
    fn from(value: Deployment) -> Self {
        Workload::Deployment(value)
    }
}

impl From<DaemonSet> for Workload {
    fn from(value: DaemonSet) -> Self {
        Workload::DaemonSet(value)
    }
}

impl From<StatefulSet> for Workload {
    fn from(value: StatefulSet) -> Self {
        Workload::StatefulSet(value)
    }
}

impl Labeled for Workload {
    fn label_set(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata().labels.as_ref()
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind(), self.namespace(), self.name())
    }
}

/// The object whose change produced a trigger
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: SourceKind,
    pub name: String,
}

/// Namespace scope at which a convergence pass must run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconciliationTrigger {
    pub namespace: String,
    pub object: Option<ObjectKey>,
}

impl ReconciliationTrigger {
    #[must_use]
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            object: None,
        }
    }

    #[must_use]
    pub fn for_object(namespace: impl Into<String>, kind: SourceKind, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            object: Some(ObjectKey {
                kind,
                name: name.into(),
            }),
        }
    }
}

impl fmt::Display for ReconciliationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.object {
            Some(object) => write!(f, "{} {}/{}", object.kind, self.namespace, object.name),
            None => write!(f, "namespace {}", self.namespace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::ByteString;

    fn deployment(annotations: Option<BTreeMap<String, String>>) -> Workload {
        Workload::Deployment(Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        annotations,
                        ..Default::default()
                    }),
                    spec: None,
                },
                ..Default::default()
            }),
            status: None,
        })
    }

    #[test]
    fn test_config_map_conversion_keeps_both_entry_kinds() {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                namespace: Some("apps".to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "synapse".to_string())])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("app.conf".to_string(), "x=1".to_string())])),
            binary_data: Some(BTreeMap::from([(
                "logo.png".to_string(),
                ByteString(vec![0x89, 0x50]),
            )])),
            ..Default::default()
        };

        let source = ConfigSource::from_config_map(&config_map);
        assert_eq!(source.kind, SourceKind::Plain);
        assert_eq!(source.identity(), "configmap/app");
        assert_eq!(source.namespace, "apps");
        assert_eq!(source.labels.get("app").map(String::as_str), Some("synapse"));
        assert_eq!(
            source.entries.get("app.conf"),
            Some(&EntryValue::Text("x=1".to_string()))
        );
        assert_eq!(
            source.entries.get("logo.png"),
            Some(&EntryValue::Binary(vec![0x89, 0x50]))
        );
    }

    #[test]
    fn test_secret_conversion_is_sensitive_and_binary() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "password".to_string(),
                ByteString(b"hunter2".to_vec()),
            )])),
            ..Default::default()
        };

        let source = ConfigSource::from_secret(&secret);
        assert_eq!(source.kind, SourceKind::Sensitive);
        assert_eq!(source.identity(), "secret/app");
        assert_eq!(
            source.entries.get("password"),
            Some(&EntryValue::Binary(b"hunter2".to_vec()))
        );
    }

    #[test]
    fn test_set_template_annotation_creates_missing_maps() {
        let mut workload = Workload::Deployment(Deployment::default());
        assert_eq!(workload.template_annotation("hash"), None);

        workload.set_template_annotation("hash", "abc");
        assert_eq!(workload.template_annotation("hash"), Some("abc"));
    }

    #[test]
    fn test_set_template_annotation_keeps_other_annotations() {
        let mut workload = deployment(Some(BTreeMap::from([(
            "other".to_string(),
            "kept".to_string(),
        )])));

        workload.set_template_annotation("hash", "abc");
        assert_eq!(workload.template_annotation("other"), Some("kept"));
        assert_eq!(workload.template_annotation("hash"), Some("abc"));
        assert_eq!(workload.to_string(), "Deployment apps/web");
    }

    #[test]
    fn test_trigger_display() {
        let trigger = ReconciliationTrigger::for_object("apps", SourceKind::Sensitive, "creds");
        assert_eq!(trigger.to_string(), "Secret apps/creds");
        assert_eq!(
            ReconciliationTrigger::for_namespace("apps").to_string(),
            "namespace apps"
        );
    }
}
