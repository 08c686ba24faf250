//! Workload health reporter
//!
//! Derives one health message per component from the readiness of the
//! workload it runs as, read back through the resource store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use crate::crd::{ChubaoCluster, HealthMessage};
use crate::domain::{HealthReporter, ManagedObject, ResourceStoreRef, WorkloadRef};

use super::status::Severity;

/// Ready vs desired replica counts of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub ready: i32,
    pub desired: i32,
}

impl Readiness {
    /// Read readiness off an observed workload. ConfigMaps and Services
    /// have no replicas and are not workloads.
    pub fn of(object: &ManagedObject) -> Option<Self> {
        match object {
            ManagedObject::StatefulSet(sts) => Some(Self {
                ready: sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
                desired: sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            }),
            ManagedObject::Deployment(deploy) => Some(Self {
                ready: deploy.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
                desired: deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            }),
            ManagedObject::DaemonSet(ds) => Some(Self {
                ready: ds.status.as_ref().map(|s| s.number_ready).unwrap_or(0),
                desired: ds.status.as_ref().map(|s| s.desired_number_scheduled).unwrap_or(0),
            }),
            ManagedObject::ConfigMap(_) | ManagedObject::Service(_) => None,
        }
    }

    /// All ready is ok, some is warning, none is critical.
    ///
    /// A DaemonSet that schedules nowhere has nothing ready and nothing
    /// failing, which is reported as a warning.
    pub fn severity(&self) -> Severity {
        if self.desired == 0 {
            Severity::Warning
        } else if self.ready >= self.desired {
            Severity::Ok
        } else if self.ready > 0 {
            Severity::Warning
        } else {
            Severity::Critical
        }
    }
}

/// [`HealthReporter`] backed by workload readiness
pub struct WorkloadHealthReporter {
    store: ResourceStoreRef,
}

impl WorkloadHealthReporter {
    pub fn new(store: ResourceStoreRef) -> Self {
        Self { store }
    }

    async fn check(&self, workload: &WorkloadRef) -> HealthMessage {
        match self.store.get(workload.kind, &workload.key).await {
            Ok(Some(object)) => match Readiness::of(&object) {
                Some(readiness) => HealthMessage::new(
                    readiness.severity().as_str(),
                    format!(
                        "{}/{} {} ready",
                        readiness.ready, readiness.desired, workload.kind
                    ),
                ),
                None => HealthMessage::new(
                    Severity::Warning.as_str(),
                    format!("{} {} is not a workload", workload.kind, workload.key),
                ),
            },
            Ok(None) => HealthMessage::new(
                Severity::Critical.as_str(),
                format!("{} {} not found", workload.kind, workload.key),
            ),
            Err(e) => HealthMessage::new(Severity::Warning.as_str(), e.to_string()),
        }
    }
}

#[async_trait]
impl HealthReporter for WorkloadHealthReporter {
    async fn report(
        &self,
        cluster: &ChubaoCluster,
        workloads: &[WorkloadRef],
    ) -> BTreeMap<String, HealthMessage> {
        let mut details = BTreeMap::new();
        for workload in workloads {
            let message = self.check(workload).await;
            debug!(
                cluster = %cluster.metadata.name.as_deref().unwrap_or_default(),
                component = %workload.component,
                severity = %message.severity,
                "Component health"
            );
            details.insert(workload.component.to_string(), message);
        }
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ChubaoClusterSpec;
    use crate::dashboards::Dashboards;
    use crate::domain::ObjectKind;
    use crate::resolver::ResolvedCluster;
    use crate::resources::tests::{test_cluster, test_identity};
    use crate::resources::{synthesize, DesiredComponent};
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    fn desired() -> Vec<DesiredComponent> {
        let resolved = ResolvedCluster::resolve(&ChubaoClusterSpec::default());
        synthesize(&resolved, &test_identity(), &Dashboards::new()).unwrap()
    }

    async fn apply_all(store: &InMemoryStore, desired: &[DesiredComponent]) {
        for component in desired {
            crate::controller::apply::apply_component(store, component)
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_readiness_severity() {
        assert_eq!(Readiness { ready: 3, desired: 3 }.severity(), Severity::Ok);
        assert_eq!(Readiness { ready: 1, desired: 3 }.severity(), Severity::Warning);
        assert_eq!(Readiness { ready: 0, desired: 3 }.severity(), Severity::Critical);
        assert_eq!(Readiness { ready: 0, desired: 0 }.severity(), Severity::Warning);
    }

    #[tokio::test]
    async fn test_fresh_workloads_are_critical() {
        let store = Arc::new(InMemoryStore::new());
        let desired = desired();
        apply_all(&store, &desired).await;

        let reporter = WorkloadHealthReporter::new(store.clone());
        let workloads: Vec<_> = desired.iter().map(|d| d.workload_ref()).collect();
        let report = reporter.report(&test_cluster("ns", "demo"), &workloads).await;

        assert_eq!(report.len(), desired.len());
        assert_eq!(report["master"].severity, "critical");
        // DaemonSets have not been scheduled yet
        assert_eq!(report["metanode"].severity, "warning");
    }

    #[tokio::test]
    async fn test_ready_workloads_are_ok() {
        let store = Arc::new(InMemoryStore::new());
        let desired = desired();
        apply_all(&store, &desired).await;
        store.mark_all_ready();

        let reporter = WorkloadHealthReporter::new(store.clone());
        let workloads: Vec<_> = desired.iter().map(|d| d.workload_ref()).collect();
        let report = reporter.report(&test_cluster("ns", "demo"), &workloads).await;

        assert!(report.values().all(|m| m.severity == "ok"));
        assert_eq!(report["master"].message, "3/3 StatefulSet ready");
    }

    #[tokio::test]
    async fn test_missing_workload_is_critical() {
        let store = Arc::new(InMemoryStore::new());
        let desired = desired();
        let reporter = WorkloadHealthReporter::new(store.clone());

        let report = reporter
            .report(&test_cluster("ns", "demo"), &[desired[1].workload_ref()])
            .await;
        assert_eq!(report["master"].severity, "critical");
        assert!(report["master"].message.contains("not found"));
    }

    #[test]
    fn test_config_map_is_not_a_workload() {
        let desired = desired();
        let config = ManagedObject::ConfigMap(desired[0].config.clone());
        assert_eq!(Readiness::of(&config), None);
        assert_eq!(desired[0].workload_ref().kind, ObjectKind::Deployment);
    }
}
