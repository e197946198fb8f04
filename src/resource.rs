//! Point-in-time views of the cluster resources that carry DNS templates.

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{Resource, ResourceExt};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Annotation holding the domain template.
pub const ANNOTATION: &str = "disco.min.io";

/// Deprecated spelling of [`ANNOTATION`], still honored.
pub const LEGACY_ANNOTATION: &str = "io.min.disco";

/// Which kind of resource a snapshot or record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A workload instance (pod).
    Instance,
    /// A service; its records also match as suffixes.
    Service,
}

impl ResourceKind {
    /// Short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Instance => "instance",
            ResourceKind::Service => "service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable view of a pod or service as delivered by the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Object name.
    pub name: String,
    /// Object namespace (empty for cluster-scoped objects).
    pub namespace: String,
    /// Pod IP or service cluster IP; empty until assigned.
    pub address: String,
    /// Set once the object has a deletion timestamp.
    pub deleting: bool,
    /// Domain template from the recognized annotation, if any.
    pub annotation: Option<String>,
    /// Full structured document the template paths are evaluated against.
    pub fields: Value,
}

impl Snapshot {
    /// Key identifying the object within its kind.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// True when the snapshot can produce a record: annotated and addressed.
    pub fn is_publishable(&self) -> bool {
        self.annotation.is_some() && !self.address.is_empty()
    }
}

/// Pick the domain template out of an annotation map.
///
/// The current key wins over the deprecated one when both are present.
pub fn template_annotation<'a, I>(annotations: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut legacy = None;
    for (key, value) in annotations {
        if key == ANNOTATION {
            return Some(value.clone());
        }
        if key == LEGACY_ANNOTATION {
            legacy = Some(value.clone());
        }
    }
    if legacy.is_some() {
        debug!(annotation = LEGACY_ANNOTATION, "using deprecated annotation key");
    }
    legacy
}

/// A watched Kubernetes type that can be turned into a [`Snapshot`].
pub trait WatchedResource:
    Resource<DynamicType = ()>
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Clone
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Which kind of record this type produces.
    const KIND: ResourceKind;

    /// Address the record should point at, empty if unassigned.
    fn address(&self) -> String;

    /// Build the snapshot handed to the reconciler.
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            kind: Self::KIND,
            name: self.name_any(),
            namespace: self.namespace().unwrap_or_default(),
            address: self.address(),
            deleting: self.meta().deletion_timestamp.is_some(),
            annotation: template_annotation(self.annotations()),
            fields: serde_json::to_value(self).unwrap_or(Value::Null),
        }
    }
}

impl WatchedResource for Pod {
    const KIND: ResourceKind = ResourceKind::Instance;

    fn address(&self) -> String {
        self.status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .unwrap_or_default()
    }
}

impl WatchedResource for Service {
    const KIND: ResourceKind = ResourceKind::Service;

    fn address(&self) -> String {
        self.spec
            .as_ref()
            .and_then(|s| s.cluster_ip.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn meta(name: &str, annotations: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_snapshot() {
        let pod = Pod {
            metadata: meta("worker-1", &[(ANNOTATION, "{metadata.name}.pod")]),
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.5".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let snap = pod.snapshot();
        assert_eq!(snap.kind, ResourceKind::Instance);
        assert_eq!(snap.name, "worker-1");
        assert_eq!(snap.namespace, "default");
        assert_eq!(snap.address, "10.0.0.5");
        assert!(!snap.deleting);
        assert_eq!(snap.annotation.as_deref(), Some("{metadata.name}.pod"));
        assert_eq!(snap.fields["metadata"]["name"], "worker-1");
        assert_eq!(snap.key(), "default/worker-1");
        assert!(snap.is_publishable());
    }

    #[test]
    fn test_pod_without_ip_is_not_publishable() {
        let pod = Pod {
            metadata: meta("worker-1", &[(ANNOTATION, "{metadata.name}.pod")]),
            ..Default::default()
        };
        let snap = pod.snapshot();
        assert_eq!(snap.address, "");
        assert!(!snap.is_publishable());
    }

    #[test]
    fn test_service_snapshot_with_deletion_timestamp() {
        let svc: Service = serde_json::from_value(serde_json::json!({
            "metadata": {
                "name": "api",
                "namespace": "default",
                "deletionTimestamp": "2024-01-01T00:00:00Z",
                "annotations": { "io.min.disco": "{metadata.name}" },
            },
            "spec": { "clusterIP": "10.0.1.9" },
        }))
        .unwrap();

        let snap = svc.snapshot();
        assert_eq!(snap.kind, ResourceKind::Service);
        assert_eq!(snap.address, "10.0.1.9");
        assert!(snap.deleting);
        assert_eq!(snap.annotation.as_deref(), Some("{metadata.name}"));
    }

    #[test]
    fn test_current_annotation_wins_over_legacy() {
        let annotations: BTreeMap<String, String> = [
            (LEGACY_ANNOTATION.to_string(), "old".to_string()),
            (ANNOTATION.to_string(), "new".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(template_annotation(&annotations).as_deref(), Some("new"));
    }

    #[test]
    fn test_unrelated_annotations_ignored() {
        let annotations: BTreeMap<String, String> =
            [("other".to_string(), "x".to_string())].into_iter().collect();
        assert_eq!(template_annotation(&annotations), None);
    }
}
