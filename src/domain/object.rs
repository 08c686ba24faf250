//! Managed objects
//!
//! The closed set of Kubernetes object kinds the reconciler creates and
//! updates on behalf of a ChubaoCluster.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

// =============================================================================
// Object Identity
// =============================================================================

/// Namespace-qualified object name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build the key of any namespaced resource
    pub fn of<K: Resource>(resource: &K) -> Self {
        Self {
            namespace: resource.namespace().unwrap_or_else(|| "default".to_string()),
            name: resource.name_any(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind of a managed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    ConfigMap,
    Service,
    StatefulSet,
    Deployment,
    DaemonSet,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::ConfigMap => write!(f, "ConfigMap"),
            ObjectKind::Service => write!(f, "Service"),
            ObjectKind::StatefulSet => write!(f, "StatefulSet"),
            ObjectKind::Deployment => write!(f, "Deployment"),
            ObjectKind::DaemonSet => write!(f, "DaemonSet"),
        }
    }
}

// =============================================================================
// Managed Object
// =============================================================================

/// An object the reconciler owns, either desired (synthesized) or observed
/// (read back from the store)
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedObject {
    ConfigMap(ConfigMap),
    Service(Service),
    StatefulSet(StatefulSet),
    Deployment(Deployment),
    DaemonSet(DaemonSet),
}

impl ManagedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedObject::ConfigMap(_) => ObjectKind::ConfigMap,
            ManagedObject::Service(_) => ObjectKind::Service,
            ManagedObject::StatefulSet(_) => ObjectKind::StatefulSet,
            ManagedObject::Deployment(_) => ObjectKind::Deployment,
            ManagedObject::DaemonSet(_) => ObjectKind::DaemonSet,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::ConfigMap(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
            ManagedObject::StatefulSet(o) => &o.metadata,
            ManagedObject::Deployment(o) => &o.metadata,
            ManagedObject::DaemonSet(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::ConfigMap(o) => &mut o.metadata,
            ManagedObject::Service(o) => &mut o.metadata,
            ManagedObject::StatefulSet(o) => &mut o.metadata,
            ManagedObject::Deployment(o) => &mut o.metadata,
            ManagedObject::DaemonSet(o) => &mut o.metadata,
        }
    }

    pub fn key(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey::new(
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        )
    }

    pub fn owner_references(&self) -> &[OwnerReference] {
        self.meta().owner_references.as_deref().unwrap_or(&[])
    }

    /// Everything the API server treats as desired state.
    ///
    /// ConfigMaps carry their payload in `data`; the other kinds in `spec`.
    /// Metadata and status are excluded so that two renderings of the same
    /// desired object compare equal.
    pub fn spec_value(&self) -> serde_json::Value {
        match self {
            ManagedObject::ConfigMap(o) => serde_json::json!({
                "data": o.data,
                "binaryData": o.binary_data,
            }),
            ManagedObject::Service(o) => serde_json::to_value(&o.spec).unwrap_or_default(),
            ManagedObject::StatefulSet(o) => serde_json::to_value(&o.spec).unwrap_or_default(),
            ManagedObject::Deployment(o) => serde_json::to_value(&o.spec).unwrap_or_default(),
            ManagedObject::DaemonSet(o) => serde_json::to_value(&o.spec).unwrap_or_default(),
        }
    }
}

impl From<ConfigMap> for ManagedObject {
    fn from(o: ConfigMap) -> Self {
        ManagedObject::ConfigMap(o)
    }
}

impl From<Service> for ManagedObject {
    fn from(o: Service) -> Self {
        ManagedObject::Service(o)
    }
}

impl From<StatefulSet> for ManagedObject {
    fn from(o: StatefulSet) -> Self {
        ManagedObject::StatefulSet(o)
    }
}

impl From<Deployment> for ManagedObject {
    fn from(o: Deployment) -> Self {
        ManagedObject::Deployment(o)
    }
}

impl From<DaemonSet> for ManagedObject {
    fn from(o: DaemonSet) -> Self {
        ManagedObject::DaemonSet(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config_map(value: &str) -> ManagedObject {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("demo-consul-config".into()),
                namespace: Some("storage".into()),
                resource_version: Some(value.len().to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("consul.json".to_string(), value.to_string())])),
            ..Default::default()
        }
        .into()
    }

    #[test]
    fn test_key_and_kind() {
        let obj = config_map("{}");
        assert_eq!(obj.kind(), ObjectKind::ConfigMap);
        assert_eq!(obj.key().to_string(), "storage/demo-consul-config");
        assert!(obj.owner_references().is_empty());
    }

    #[test]
    fn test_spec_value_ignores_metadata() {
        let a = config_map("{}");
        let mut b = config_map("{}");
        b.meta_mut().labels = Some(BTreeMap::from([("x".to_string(), "y".to_string())]));
        assert_eq!(a.spec_value(), b.spec_value());

        let c = config_map("{\"ui\":true}");
        assert_ne!(a.spec_value(), c.spec_value());
    }
}
