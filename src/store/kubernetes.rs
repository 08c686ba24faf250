//! ResourceStore over the Kubernetes API server

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, instrument};

use crate::crd::{ChubaoCluster, ChubaoClusterStatus};
use crate::domain::{ManagedObject, ObjectKey, ObjectKind, ResourceStore, StoreResult};
use crate::error::StoreError;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "chubao-operator";

/// Store backed by a live cluster
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    async fn create_object<K>(&self, object: &K) -> StoreResult<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
    {
        let key = ObjectKey::of(object);
        self.api::<K>(&key.namespace)
            .create(&Self::post_params(), object)
            .await?;
        Ok(())
    }

    /// Replace the live object with `desired`.
    ///
    /// The live resourceVersion is carried over, so a concurrent writer makes
    /// this fail with a conflict instead of being overwritten. `carry` copies
    /// any server-assigned fields the desired object cannot know.
    async fn replace_object<K>(&self, desired: &K, carry: fn(&K, &mut K)) -> StoreResult<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
    {
        let key = ObjectKey::of(desired);
        let api = self.api::<K>(&key.namespace);

        let live = api
            .get_opt(&key.name)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let mut object = desired.clone();
        object.meta_mut().resource_version = live.resource_version();
        carry(&live, &mut object);

        api.replace(&key.name, &Self::post_params(), &object).await?;
        Ok(())
    }

    async fn get_object<K>(&self, key: &ObjectKey) -> StoreResult<Option<ManagedObject>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
        ManagedObject: From<K>,
    {
        let object = self.api::<K>(&key.namespace).get_opt(&key.name).await?;
        Ok(object.map(ManagedObject::from))
    }
}

fn keep_nothing<K>(_live: &K, _desired: &mut K) {}

/// Cluster IPs are allocated by the API server and immutable
fn keep_cluster_ip(live: &Service, desired: &mut Service) {
    if let (Some(live_spec), Some(spec)) = (live.spec.as_ref(), desired.spec.as_mut()) {
        if spec.cluster_ip.is_none() || spec.cluster_ip.as_deref() == Some("") {
            spec.cluster_ip = live_spec.cluster_ip.clone();
        }
        if spec.cluster_ips.is_none() {
            spec.cluster_ips = live_spec.cluster_ips.clone();
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    #[instrument(skip(self), fields(cluster = %key))]
    async fn get_cluster(&self, key: &ObjectKey) -> StoreResult<Option<ChubaoCluster>> {
        Ok(self
            .api::<ChubaoCluster>(&key.namespace)
            .get_opt(&key.name)
            .await?)
    }

    #[instrument(skip(self, status), fields(cluster = %key))]
    async fn update_cluster_status(
        &self,
        key: &ObjectKey,
        status: &ChubaoClusterStatus,
    ) -> StoreResult<()> {
        let patch = serde_json::json!({ "status": status });
        self.api::<ChubaoCluster>(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(state = ?status.state, "Patched cluster status");
        Ok(())
    }

    async fn create(&self, object: &ManagedObject) -> StoreResult<()> {
        match object {
            ManagedObject::ConfigMap(o) => self.create_object(o).await,
            ManagedObject::Service(o) => self.create_object(o).await,
            ManagedObject::StatefulSet(o) => self.create_object(o).await,
            ManagedObject::Deployment(o) => self.create_object(o).await,
            ManagedObject::DaemonSet(o) => self.create_object(o).await,
        }
    }

    async fn update(&self, object: &ManagedObject) -> StoreResult<()> {
        match object {
            ManagedObject::ConfigMap(o) => self.replace_object(o, keep_nothing).await,
            ManagedObject::Service(o) => self.replace_object(o, keep_cluster_ip).await,
            ManagedObject::StatefulSet(o) => self.replace_object(o, keep_nothing).await,
            ManagedObject::Deployment(o) => self.replace_object(o, keep_nothing).await,
            ManagedObject::DaemonSet(o) => self.replace_object(o, keep_nothing).await,
        }
    }

    async fn get(&self, kind: ObjectKind, key: &ObjectKey) -> StoreResult<Option<ManagedObject>> {
        match kind {
            ObjectKind::ConfigMap => self.get_object::<ConfigMap>(key).await,
            ObjectKind::Service => self.get_object::<Service>(key).await,
            ObjectKind::StatefulSet => self.get_object::<StatefulSet>(key).await,
            ObjectKind::Deployment => self.get_object::<Deployment>(key).await,
            ObjectKind::DaemonSet => self.get_object::<DaemonSet>(key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn service(cluster_ip: Option<&str>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                cluster_ip: cluster_ip.map(String::from),
                cluster_ips: cluster_ip.map(|ip| vec![ip.to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_keep_cluster_ip_fills_allocated_address() {
        let live = service(Some("10.0.0.12"));
        let mut desired = service(None);
        keep_cluster_ip(&live, &mut desired);

        let spec = desired.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("10.0.0.12"));
        assert_eq!(spec.cluster_ips, Some(vec!["10.0.0.12".to_string()]));
    }

    #[test]
    fn test_keep_cluster_ip_leaves_headless_alone() {
        let live = service(Some("None"));
        let mut desired = service(Some("None"));
        keep_cluster_ip(&live, &mut desired);
        assert_eq!(desired.spec.unwrap().cluster_ip.as_deref(), Some("None"));
    }
}
