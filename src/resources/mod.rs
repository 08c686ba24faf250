//! Resource Synthesizer
//!
//! Pure functions from a resolved configuration to the desired Kubernetes
//! objects of every component. Nothing in this module performs I/O.
//!
//! Each component yields, in apply order:
//! - a ConfigMap with its configuration files
//! - a Service (its stable network identity)
//! - its workload: a StatefulSet for the master raft group, DaemonSets for
//!   the meta and data nodes, single-replica Deployments for the add-ons

pub mod address;
pub mod common;
pub mod consul;
pub mod datanode;
pub mod grafana;
pub mod master;
pub mod metanode;
pub mod prometheus;

use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::ChubaoCluster;
use crate::dashboards::Dashboards;
use crate::domain::{Component, ManagedObject, ObjectKey, WorkloadRef};
use crate::error::{Error, Result};
use crate::resolver::ResolvedCluster;

// =============================================================================
// Cluster Identity
// =============================================================================

/// Who owns the synthesized objects
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterIdentity {
    pub namespace: String,
    pub name: String,
    /// Controller owner reference back to the ChubaoCluster
    pub owner: OwnerReference,
}

impl ClusterIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, owner: OwnerReference) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            owner,
        }
    }

    /// Identity of a stored cluster. Requires a namespace and a uid.
    pub fn of(cluster: &ChubaoCluster) -> Result<Self> {
        let namespace = cluster
            .namespace()
            .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;
        let owner = cluster
            .controller_owner_ref(&())
            .ok_or_else(|| Error::MissingField("metadata.uid".to_string()))?;
        Ok(Self::new(namespace, cluster.name_any(), owner))
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

// =============================================================================
// Derived Addresses
// =============================================================================

/// Inter-component addresses, derived once per pass and handed explicitly to
/// the builders that embed them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Raft bootstrap peers of the master group
    pub master_peers: String,
    /// Client addresses of every master replica
    pub master_addresses: Vec<String>,
    /// `host:port` of the consul agent
    pub consul_address: String,
    pub consul_url: String,
    pub prometheus_url: String,
}

impl Endpoints {
    pub fn derive(resolved: &ResolvedCluster, id: &ClusterIdentity) -> Self {
        let master = common::object_name(&id.name, Component::Master);
        let consul = common::object_name(&id.name, Component::Consul);
        let prometheus = common::object_name(&id.name, Component::Prometheus);

        Self {
            master_peers: address::peer_list(
                resolved.master.replicas,
                &master,
                &id.namespace,
                resolved.master.port,
            ),
            master_addresses: address::master_addresses(
                resolved.master.replicas,
                &master,
                &id.namespace,
                resolved.master.port,
            ),
            consul_address: format!(
                "{}:{}",
                address::service_host(&consul, &id.namespace),
                resolved.consul.port
            ),
            consul_url: address::service_url(&consul, &id.namespace, resolved.consul.port),
            prometheus_url: address::service_url(
                &prometheus,
                &id.namespace,
                resolved.prometheus.port,
            ),
        }
    }
}

// =============================================================================
// Desired Objects
// =============================================================================

/// Desired object set of one component
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredComponent {
    pub component: Component,
    pub config: ConfigMap,
    pub endpoint: Service,
    pub workload: ManagedObject,
}

impl DesiredComponent {
    /// Objects in apply order: config, endpoint, workload
    pub fn objects(&self) -> Vec<ManagedObject> {
        vec![
            ManagedObject::ConfigMap(self.config.clone()),
            ManagedObject::Service(self.endpoint.clone()),
            self.workload.clone(),
        ]
    }

    pub fn workload_ref(&self) -> WorkloadRef {
        WorkloadRef {
            component: self.component,
            kind: self.workload.kind(),
            key: self.workload.key(),
        }
    }
}

/// Build the desired objects of every component, in apply order
pub fn synthesize(
    resolved: &ResolvedCluster,
    id: &ClusterIdentity,
    dashboards: &Dashboards,
) -> Result<Vec<DesiredComponent>> {
    let endpoints = Endpoints::derive(resolved, id);

    Component::ALL
        .iter()
        .map(|component| synthesize_component(*component, resolved, id, &endpoints, dashboards))
        .collect()
}

/// Build the desired objects of one component
pub fn synthesize_component(
    component: Component,
    resolved: &ResolvedCluster,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
    dashboards: &Dashboards,
) -> Result<DesiredComponent> {
    let desired = match component {
        Component::Consul => consul::build(&resolved.common, &resolved.consul, id)?,
        Component::Master => master::build(&resolved.common, &resolved.master, id, endpoints)?,
        Component::MetaNode => {
            metanode::build(&resolved.common, &resolved.meta_node, id, endpoints)?
        }
        Component::DataNode => {
            datanode::build(&resolved.common, &resolved.data_node, id, endpoints)?
        }
        Component::Prometheus => {
            prometheus::build(&resolved.common, &resolved.prometheus, id, endpoints)?
        }
        Component::Grafana => {
            grafana::build(&resolved.common, &resolved.grafana, id, endpoints, dashboards)?
        }
    };
    Ok(desired)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crd::ChubaoClusterSpec;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    pub(crate) fn test_cluster(namespace: &str, name: &str) -> ChubaoCluster {
        let mut cluster = ChubaoCluster::new(name, ChubaoClusterSpec::default());
        cluster.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}", name)),
            generation: Some(1),
            ..Default::default()
        };
        cluster
    }

    pub(crate) fn test_identity() -> ClusterIdentity {
        ClusterIdentity::of(&test_cluster("ns", "demo")).unwrap()
    }

    fn synthesize_default() -> Vec<DesiredComponent> {
        let resolved = ResolvedCluster::resolve(&ChubaoClusterSpec::default());
        synthesize(&resolved, &test_identity(), &Dashboards::new()).unwrap()
    }

    #[test]
    fn test_identity_requires_uid() {
        let mut cluster = test_cluster("ns", "demo");
        cluster.metadata.uid = None;
        assert!(matches!(
            ClusterIdentity::of(&cluster),
            Err(Error::MissingField(_))
        ));
    }

    #[test]
    fn test_every_component_synthesized_in_order() {
        let desired = synthesize_default();
        let components: Vec<_> = desired.iter().map(|d| d.component).collect();
        assert_eq!(components, Component::ALL.to_vec());
    }

    #[test]
    fn test_every_object_is_owned_by_the_cluster() {
        let id = test_identity();
        for component in synthesize_default() {
            for object in component.objects() {
                let owners = object.owner_references();
                assert_eq!(owners.len(), 1, "{} {}", object.kind(), object.key());
                assert_eq!(owners[0].uid, "uid-demo");
                assert_eq!(owners[0].name, id.name);
                assert_eq!(owners[0].kind, "ChubaoCluster");
                assert_eq!(owners[0].controller, Some(true));
                assert_eq!(object.key().namespace, "ns");
            }
        }
    }

    #[test]
    fn test_object_names_are_prefixed_by_cluster() {
        for component in synthesize_default() {
            for object in component.objects() {
                assert!(object.key().name.starts_with("demo-"));
            }
        }
    }

    fn workload_pod(object: &ManagedObject) -> PodSpec {
        let template = match object {
            ManagedObject::StatefulSet(s) => s.spec.as_ref().map(|s| &s.template),
            ManagedObject::DaemonSet(d) => d.spec.as_ref().map(|s| &s.template),
            ManagedObject::Deployment(d) => d.spec.as_ref().map(|s| &s.template),
            other => panic!("{} is not a workload", other.kind()),
        };
        template.and_then(|t| t.spec.clone()).unwrap()
    }

    #[test]
    fn test_every_workload_mounts_data_logs_and_config() {
        for desired in synthesize_default() {
            let pod = workload_pod(&desired.workload);
            let volumes = pod.volumes.unwrap_or_default();
            let host_path = |name: &str| {
                volumes
                    .iter()
                    .find(|v| v.name == name)
                    .and_then(|v| v.host_path.as_ref())
                    .map(|h| h.path.clone())
            };

            let data = host_path(common::DATA_VOLUME);
            let logs = host_path(common::LOG_VOLUME);
            assert!(data.is_some(), "{} has no data host path", desired.component);
            assert!(logs.is_some(), "{} has no log host path", desired.component);
            assert_ne!(data, logs);

            let config = volumes
                .iter()
                .find(|v| v.name == common::CONFIG_VOLUME)
                .and_then(|v| v.config_map.as_ref())
                .unwrap();
            assert_eq!(
                config.name,
                Some(common::config_name("demo", desired.component))
            );

            let mounted: Vec<_> = pod.containers[0]
                .volume_mounts
                .iter()
                .flatten()
                .map(|m| m.name.as_str())
                .collect();
            for name in [common::DATA_VOLUME, common::LOG_VOLUME, common::CONFIG_VOLUME] {
                assert!(mounted.contains(&name), "{} does not mount {}", desired.component, name);
            }
        }
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        assert_eq!(synthesize_default(), synthesize_default());
    }

    #[test]
    fn test_endpoints_follow_replicas_and_namespace() {
        let mut spec = ChubaoClusterSpec::default();
        spec.master.replicas = 5;
        let resolved = ResolvedCluster::resolve(&spec);
        let id = test_identity();

        let endpoints = Endpoints::derive(&resolved, &id);
        assert_eq!(endpoints.master_addresses.len(), 5);
        assert!(endpoints
            .master_peers
            .starts_with("1:demo-master-0.demo-master.ns.svc.cluster.local:17010,"));
        assert_eq!(endpoints.consul_address, "demo-consul.ns.svc.cluster.local:8500");
        assert_eq!(
            endpoints.prometheus_url,
            "http://demo-prometheus.ns.svc.cluster.local:9090"
        );
    }
}
