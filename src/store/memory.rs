//! In-memory ResourceStore
//!
//! Behaves like the API server where the reconciler can observe it:
//! - create fails with `AlreadyExists` when the name is taken
//! - update of a missing object fails with `NotFound`
//! - `metadata.generation` starts at 1 and bumps only when the spec changes
//! - workload status survives updates
//!
//! Faults can be injected per object, and workload readiness is simulated
//! with [`InMemoryStore::mark_ready`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSetStatus, DeploymentStatus, StatefulSetStatus};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use crate::crd::{ChubaoCluster, ChubaoClusterSpec, ChubaoClusterStatus};
use crate::domain::{ManagedObject, ObjectKey, ObjectKind, ResourceStore, StoreResult};
use crate::error::StoreError;

type Slot = (ObjectKind, ObjectKey);

#[derive(Default)]
struct State {
    clusters: BTreeMap<ObjectKey, ChubaoCluster>,
    objects: BTreeMap<Slot, ManagedObject>,
    create_faults: BTreeMap<Slot, StoreError>,
    update_faults: BTreeMap<Slot, StoreError>,
    /// Fault for every status write
    status_fault: Option<StoreError>,
}

/// Deterministic store for tests and benchmarks
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    resource_version: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_resource_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    // =========================================================================
    // Clusters
    // =========================================================================

    /// Store a cluster as if a user had created it
    pub fn insert_cluster(&self, mut cluster: ChubaoCluster) {
        if cluster.metadata.generation.is_none() {
            cluster.metadata.generation = Some(1);
        }
        cluster.metadata.resource_version = Some(self.next_resource_version());
        let key = ObjectKey::of(&cluster);
        self.state.lock().clusters.insert(key, cluster);
    }

    /// Edit a cluster's spec as a user would; bumps the generation on change
    pub fn update_cluster_spec<F>(&self, key: &ObjectKey, edit: F)
    where
        F: FnOnce(&mut ChubaoClusterSpec),
    {
        let mut state = self.state.lock();
        if let Some(cluster) = state.clusters.get_mut(key) {
            let before = cluster.spec.clone();
            edit(&mut cluster.spec);
            if cluster.spec != before {
                cluster.metadata.generation = Some(cluster.metadata.generation.unwrap_or(0) + 1);
            }
        }
    }

    pub fn remove_cluster(&self, key: &ObjectKey) {
        self.state.lock().clusters.remove(key);
    }

    pub fn cluster(&self, key: &ObjectKey) -> Option<ChubaoCluster> {
        self.state.lock().clusters.get(key).cloned()
    }

    // =========================================================================
    // Objects
    // =========================================================================

    pub fn object(&self, kind: ObjectKind, key: &ObjectKey) -> Option<ManagedObject> {
        self.state.lock().objects.get(&(kind, key.clone())).cloned()
    }

    /// Stored generation of an object
    pub fn generation(&self, kind: ObjectKind, key: &ObjectKey) -> Option<i64> {
        self.object(kind, key).and_then(|o| o.meta().generation)
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Fault Injection & Readiness
    // =========================================================================

    /// Fail every create and update of one object with `error`
    pub fn fail_on(&self, kind: ObjectKind, key: ObjectKey, error: StoreError) {
        let mut state = self.state.lock();
        state.create_faults.insert((kind, key.clone()), error.clone());
        state.update_faults.insert((kind, key), error);
    }

    /// Fail only updates of one object with `error`
    pub fn fail_updates_on(&self, kind: ObjectKind, key: ObjectKey, error: StoreError) {
        self.state.lock().update_faults.insert((kind, key), error);
    }

    /// Fail every status write with `error`
    pub fn fail_status_updates(&self, error: StoreError) {
        self.state.lock().status_fault = Some(error);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.create_faults.clear();
        state.update_faults.clear();
        state.status_fault = None;
    }

    /// Report a workload as fully rolled out and ready
    pub fn mark_ready(&self, kind: ObjectKind, key: &ObjectKey) {
        if let Some(object) = self.state.lock().objects.get_mut(&(kind, key.clone())) {
            set_ready(object);
        }
    }

    /// Report every stored workload as ready
    pub fn mark_all_ready(&self) {
        for object in self.state.lock().objects.values_mut() {
            set_ready(object);
        }
    }
}

fn set_ready(object: &mut ManagedObject) {
    match object {
        ManagedObject::StatefulSet(sts) => {
            let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            sts.status = Some(StatefulSetStatus {
                replicas,
                ready_replicas: Some(replicas),
                available_replicas: Some(replicas),
                ..Default::default()
            });
        }
        ManagedObject::Deployment(deploy) => {
            let replicas = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            deploy.status = Some(DeploymentStatus {
                replicas: Some(replicas),
                ready_replicas: Some(replicas),
                available_replicas: Some(replicas),
                ..Default::default()
            });
        }
        ManagedObject::DaemonSet(ds) => {
            ds.status = Some(DaemonSetStatus {
                desired_number_scheduled: 1,
                current_number_scheduled: 1,
                number_ready: 1,
                ..Default::default()
            });
        }
        ManagedObject::ConfigMap(_) | ManagedObject::Service(_) => {}
    }
}

/// Copy server-owned status from the stored object onto its replacement
fn carry_status(live: &ManagedObject, next: &mut ManagedObject) {
    match (live, next) {
        (ManagedObject::StatefulSet(l), ManagedObject::StatefulSet(n)) => n.status = l.status.clone(),
        (ManagedObject::Deployment(l), ManagedObject::Deployment(n)) => n.status = l.status.clone(),
        (ManagedObject::DaemonSet(l), ManagedObject::DaemonSet(n)) => n.status = l.status.clone(),
        (ManagedObject::Service(l), ManagedObject::Service(n)) => n.status = l.status.clone(),
        _ => {}
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_cluster(&self, key: &ObjectKey) -> StoreResult<Option<ChubaoCluster>> {
        Ok(self.cluster(key))
    }

    async fn update_cluster_status(
        &self,
        key: &ObjectKey,
        status: &ChubaoClusterStatus,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = state.status_fault.clone() {
            return Err(err);
        }
        let cluster = state
            .clusters
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        cluster.status = Some(status.clone());
        Ok(())
    }

    async fn create(&self, object: &ManagedObject) -> StoreResult<()> {
        let slot = (object.kind(), object.key());
        let resource_version = self.next_resource_version();
        let mut state = self.state.lock();

        if let Some(err) = state.create_faults.get(&slot) {
            return Err(err.clone());
        }
        if state.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists(format!("{} {}", slot.0, slot.1)));
        }

        let mut stored = object.clone();
        let meta = stored.meta_mut();
        meta.generation = Some(1);
        meta.resource_version = Some(resource_version);
        meta.uid = Some(format!("{}-{}", slot.1.name, slot.0).to_lowercase());

        trace!(kind = %slot.0, object = %slot.1, "Created object");
        state.objects.insert(slot, stored);
        self.creates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn update(&self, object: &ManagedObject) -> StoreResult<()> {
        let slot = (object.kind(), object.key());
        let mut state = self.state.lock();

        if let Some(err) = state.update_faults.get(&slot) {
            return Err(err.clone());
        }
        let live = state
            .objects
            .get(&slot)
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", slot.0, slot.1)))?;

        let mut next = object.clone();
        carry_status(live, &mut next);

        let live_meta = live.meta();
        let spec_changed = next.spec_value() != live.spec_value();
        let mut generation = live_meta.generation.unwrap_or(1);
        if spec_changed {
            generation += 1;
        }
        let changed = spec_changed
            || next.meta().labels != live_meta.labels
            || next.meta().owner_references != live_meta.owner_references;
        let resource_version = if changed {
            Some(self.next_resource_version())
        } else {
            live_meta.resource_version.clone()
        };
        let uid = live_meta.uid.clone();

        let meta = next.meta_mut();
        meta.generation = Some(generation);
        meta.resource_version = resource_version;
        meta.uid = uid;

        trace!(kind = %slot.0, object = %slot.1, generation, "Updated object");
        state.objects.insert(slot, next);
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, kind: ObjectKind, key: &ObjectKey) -> StoreResult<Option<ManagedObject>> {
        Ok(self.object(kind, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn config_map(value: &str) -> ManagedObject {
        ManagedObject::ConfigMap(ConfigMap {
            metadata: ObjectMeta {
                name: Some("demo-master-config".into()),
                namespace: Some("ns".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
            ..Default::default()
        })
    }

    fn key() -> ObjectKey {
        ObjectKey::new("ns", "demo-master-config")
    }

    #[tokio::test]
    async fn test_create_then_already_exists() {
        let store = InMemoryStore::new();
        store.create(&config_map("a")).await.unwrap();
        assert_matches!(
            store.create(&config_map("a")).await,
            Err(StoreError::AlreadyExists(_))
        );
        assert_eq!(store.generation(ObjectKind::ConfigMap, &key()), Some(1));
    }

    #[tokio::test]
    async fn test_generation_bumps_only_on_spec_change() {
        let store = InMemoryStore::new();
        store.create(&config_map("a")).await.unwrap();

        store.update(&config_map("a")).await.unwrap();
        assert_eq!(store.generation(ObjectKind::ConfigMap, &key()), Some(1));

        store.update(&config_map("b")).await.unwrap();
        assert_eq!(store.generation(ObjectKind::ConfigMap, &key()), Some(2));
    }

    #[tokio::test]
    async fn test_update_missing_object() {
        let store = InMemoryStore::new();
        assert_matches!(
            store.update(&config_map("a")).await,
            Err(StoreError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = InMemoryStore::new();
        store.fail_on(
            ObjectKind::ConfigMap,
            key(),
            StoreError::Timeout("injected".into()),
        );
        assert_matches!(
            store.create(&config_map("a")).await,
            Err(StoreError::Timeout(_))
        );
        assert_eq!(store.object_count(), 0);

        store.clear_faults();
        store.create(&config_map("a")).await.unwrap();
        assert_eq!(store.create_count(), 1);
    }

    #[test]
    fn test_spec_edit_bumps_cluster_generation() {
        let store = InMemoryStore::new();
        let mut cluster = ChubaoCluster::new("demo", ChubaoClusterSpec::default());
        cluster.metadata.namespace = Some("ns".into());
        store.insert_cluster(cluster);

        let key = ObjectKey::new("ns", "demo");
        store.update_cluster_spec(&key, |spec| spec.master.replicas = 3);
        assert_eq!(store.cluster(&key).unwrap().metadata.generation, Some(2));

        store.update_cluster_spec(&key, |spec| spec.master.replicas = 3);
        assert_eq!(store.cluster(&key).unwrap().metadata.generation, Some(2));
    }
}
