//! Apply Engine
//!
//! Idempotent create-or-update of desired objects:
//! 1. create
//! 2. on `AlreadyExists`, update
//! 3. any other failure is returned, attributed to the object and operation
//!
//! Field-level diffing is left to the store, which must not bump an object's
//! generation for an update that changes nothing.

use tracing::{debug, instrument};

use crate::domain::{ManagedObject, ResourceStore};
use crate::error::{ApplyError, ApplyOperation, ComponentFailure};
use crate::resources::DesiredComponent;

/// Outcome of a successful apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
}

impl std::fmt::Display for Applied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Applied::Created => write!(f, "created"),
            Applied::Updated => write!(f, "updated"),
        }
    }
}

/// Create-or-update one object
#[instrument(skip(store, object), fields(kind = %object.kind(), object = %object.key()))]
pub async fn apply(store: &dyn ResourceStore, object: &ManagedObject) -> Result<Applied, ApplyError> {
    let fail = |operation, source| {
        let key = object.key();
        ApplyError {
            kind: object.kind(),
            namespace: key.namespace,
            name: key.name,
            operation,
            source,
        }
    };

    match store.create(object).await {
        Ok(()) => {
            debug!("Created");
            Ok(Applied::Created)
        }
        Err(err) if err.is_already_exists() => {
            store
                .update(object)
                .await
                .map_err(|source| fail(ApplyOperation::Update, source))?;
            debug!("Updated");
            Ok(Applied::Updated)
        }
        Err(source) => Err(fail(ApplyOperation::Create, source)),
    }
}

/// Apply a component's objects in order, stopping at its first failure.
///
/// Later objects of the same component depend on earlier ones (the workload
/// mounts the ConfigMap and is governed by the Service), so there is no
/// point in going on once one of them fails.
pub async fn apply_component(
    store: &dyn ResourceStore,
    desired: &DesiredComponent,
) -> Result<Vec<Applied>, ComponentFailure> {
    let mut outcomes = Vec::with_capacity(3);
    for object in desired.objects() {
        let applied = apply(store, &object)
            .await
            .map_err(|error| ComponentFailure {
                component: desired.component.to_string(),
                error,
            })?;
        outcomes.push(applied);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ChubaoClusterSpec;
    use crate::dashboards::Dashboards;
    use crate::domain::ObjectKind;
    use crate::error::StoreError;
    use crate::resolver::ResolvedCluster;
    use crate::resources::{synthesize, tests::test_identity};
    use crate::store::InMemoryStore;
    use assert_matches::assert_matches;

    fn desired() -> Vec<DesiredComponent> {
        let resolved = ResolvedCluster::resolve(&ChubaoClusterSpec::default());
        synthesize(&resolved, &test_identity(), &Dashboards::new()).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let store = InMemoryStore::new();
        let desired = desired();
        let master = &desired[1];
        let object = &master.workload;

        assert_eq!(apply(&store, object).await.unwrap(), Applied::Created);
        assert_eq!(apply(&store, object).await.unwrap(), Applied::Updated);
    }

    #[tokio::test]
    async fn test_unchanged_apply_keeps_generation() {
        let store = InMemoryStore::new();
        let desired = desired();
        let master = &desired[1];
        let key = master.workload.key();

        apply_component(&store, master).await.unwrap();
        let first = store.generation(ObjectKind::StatefulSet, &key);

        apply_component(&store, master).await.unwrap();
        assert_eq!(store.generation(ObjectKind::StatefulSet, &key), first);
        assert_eq!(first, Some(1));
    }

    #[tokio::test]
    async fn test_failure_is_attributed() {
        let store = InMemoryStore::new();
        let desired = desired();
        let master = &desired[1];
        store.fail_on(
            ObjectKind::Service,
            master.workload.key(),
            StoreError::Forbidden("rbac".into()),
        );

        let failure = apply_component(&store, master).await.unwrap_err();
        assert_eq!(failure.component, "master");
        assert_eq!(failure.error.kind, ObjectKind::Service);
        assert_eq!(failure.error.operation, ApplyOperation::Create);
        assert_eq!(failure.error.name, "demo-master");
        assert_matches!(failure.error.source, StoreError::Forbidden(_));

        // the ConfigMap went through, the workload was never attempted
        assert_eq!(store.object_count(), 1);
    }

    #[tokio::test]
    async fn test_update_failure_is_attributed_to_update() {
        let store = InMemoryStore::new();
        let desired = desired();
        let master = &desired[1];
        apply(&store, &master.workload).await.unwrap();

        store.fail_updates_on(
            ObjectKind::StatefulSet,
            master.workload.key(),
            StoreError::Conflict("stale".into()),
        );
        let err = apply(&store, &master.workload).await.unwrap_err();
        assert_eq!(err.operation, ApplyOperation::Update);
        assert_eq!(err.kind, ObjectKind::StatefulSet);
        assert!(err.is_retryable());
    }
}
