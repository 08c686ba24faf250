//! Master raft group
//!
//! Runs as a StatefulSet with ordered, stable identities behind a headless
//! Service of the same name, so that every replica's peer address is known
//! before any replica exists. The peer list is baked into the configuration
//! each replica boots with.

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use serde_json::json;
use std::collections::BTreeMap;

use super::common::{
    config_map, container_port, env, field_env, headless_service, label_selector, object_meta,
    object_name, pod_meta, privileged, resource_requirements, service_port, start_command,
    start_script, storage_node_selector, storage_volumes, DATA_PATH, LOG_PATH, START_SCRIPT,
};
use super::{ClusterIdentity, DesiredComponent, Endpoints};
use crate::domain::{Component, ManagedObject};
use crate::error::Result;
use crate::resolver::{CommonConfig, MasterConfig};

const ROLE: &str = "master";
pub const CONFIG_FILE: &str = "master.json";

pub fn build(
    common: &CommonConfig,
    master: &MasterConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
) -> Result<DesiredComponent> {
    Ok(DesiredComponent {
        component: Component::Master,
        config: config_map(id, Component::Master, config_data(master, endpoints)?),
        endpoint: headless_service(
            id,
            Component::Master,
            vec![
                service_port("port", master.port),
                service_port("prof", master.prof),
                service_port("exporter-port", master.exporter_port),
            ],
        ),
        workload: ManagedObject::StatefulSet(statefulset(common, master, id, endpoints)),
    })
}

/// `master.json` template plus the start script
fn config_data(master: &MasterConfig, endpoints: &Endpoints) -> Result<BTreeMap<String, String>> {
    let config = json!({
        "role": ROLE,
        "ip": "__IP__",
        "id": "__ID__",
        "listen": master.port.to_string(),
        "prof": master.prof.to_string(),
        "peers": endpoints.master_peers,
        "clusterName": master.cluster_name,
        "retainLogs": master.retain_logs.to_string(),
        "logDir": format!("{}/{}", LOG_PATH, ROLE),
        "logLevel": master.log_level,
        "walDir": format!("{}/{}/raft", DATA_PATH, ROLE),
        "storeDir": format!("{}/{}/rocksdbstore", DATA_PATH, ROLE),
        "exporterPort": master.exporter_port,
        "consulAddr": endpoints.consul_url,
        "metaNodeReservedMem": master.meta_node_reserved_mem.to_string(),
    });

    Ok(BTreeMap::from([
        (CONFIG_FILE.to_string(), serde_json::to_string_pretty(&config)?),
        (START_SCRIPT.to_string(), start_script(ROLE, true)),
    ]))
}

fn statefulset(
    common: &CommonConfig,
    master: &MasterConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
) -> StatefulSet {
    // Peer names are `{name}-{i}.{name}`: the StatefulSet and its governing
    // Service must share a name
    let name = object_name(&id.name, Component::Master);

    StatefulSet {
        metadata: object_meta(id, name.clone(), Component::Master),
        spec: Some(StatefulSetSpec {
            replicas: Some(master.replicas),
            service_name: name,
            pod_management_policy: Some("OrderedReady".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some(master.update_strategy.clone()),
                ..Default::default()
            }),
            selector: label_selector(id, Component::Master),
            template: PodTemplateSpec {
                metadata: Some(pod_meta(id, Component::Master)),
                spec: Some(pod_spec(common, master, id, endpoints)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_spec(
    common: &CommonConfig,
    master: &MasterConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
) -> PodSpec {
    let (volumes, mounts) = storage_volumes(
        id,
        Component::Master,
        &common.data_dir_host_path,
        &common.log_dir_host_path,
    );

    PodSpec {
        node_selector: Some(storage_node_selector(
            &id.namespace,
            Component::Master,
            &master.node_selector,
        )),
        host_network: Some(true),
        host_pid: Some(true),
        dns_policy: Some("ClusterFirstWithHostNet".to_string()),
        containers: vec![Container {
            name: "master-pod".to_string(),
            image: Some(common.server_image.clone()),
            image_pull_policy: Some(common.image_pull_policy.clone()),
            security_context: Some(privileged()),
            command: Some(start_command()),
            env: Some(vec![
                env("CBFS_CLUSTER_NAME", &master.cluster_name),
                env("CBFS_PORT", master.port),
                env("CBFS_PROF", master.prof),
                env("CBFS_MASTER_PEERS", &endpoints.master_peers),
                env("CBFS_RETAIN_LOGS", master.retain_logs),
                env("CBFS_LOG_LEVEL", &master.log_level),
                env("CBFS_EXPORTER_PORT", master.exporter_port),
                env("CBFS_CONSUL_ADDR", &endpoints.consul_url),
                env("CBFS_METANODE_RESERVED_MEM", master.meta_node_reserved_mem),
                field_env("POD_IP", "status.podIP"),
                field_env("POD_NAME", "metadata.name"),
            ]),
            ports: Some(vec![
                container_port("port", master.port),
                container_port("prof", master.prof),
                container_port("exporter-port", master.exporter_port),
            ]),
            volume_mounts: Some(mounts),
            resources: resource_requirements(&master.resources),
            ..Default::default()
        }],
        volumes: Some(volumes),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ChubaoClusterSpec;
    use crate::resolver::ResolvedCluster;
    use crate::resources::tests::test_identity;

    fn build_default(spec: &ChubaoClusterSpec) -> DesiredComponent {
        let resolved = ResolvedCluster::resolve(spec);
        let id = test_identity();
        let endpoints = Endpoints::derive(&resolved, &id);
        build(&resolved.common, &resolved.master, &id, &endpoints).unwrap()
    }

    fn env_value(sts: &StatefulSet, name: &str) -> Option<String> {
        let pod = sts.spec.as_ref()?.template.spec.as_ref()?;
        pod.containers[0]
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.clone())
    }

    #[test]
    fn test_statefulset_identity_matches_headless_service() {
        let desired = build_default(&ChubaoClusterSpec::default());
        let ManagedObject::StatefulSet(sts) = &desired.workload else {
            panic!("master must be a StatefulSet");
        };
        let spec = sts.spec.as_ref().unwrap();

        assert_eq!(sts.metadata.name.as_deref(), Some("demo-master"));
        assert_eq!(spec.service_name, "demo-master");
        assert_eq!(desired.endpoint.metadata.name.as_deref(), Some("demo-master"));
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.pod_management_policy.as_deref(), Some("OrderedReady"));

        let svc = desired.endpoint.spec.as_ref().unwrap();
        assert_eq!(svc.cluster_ip.as_deref(), Some("None"));
        assert_eq!(svc.publish_not_ready_addresses, Some(true));
        assert_eq!(svc.selector.as_ref(), spec.selector.match_labels.as_ref());
    }

    #[test]
    fn test_peer_list_embedded_in_env_and_config() {
        let desired = build_default(&ChubaoClusterSpec::default());
        let ManagedObject::StatefulSet(sts) = &desired.workload else {
            panic!("master must be a StatefulSet");
        };

        let peers = env_value(sts, "CBFS_MASTER_PEERS").unwrap();
        assert_eq!(
            peers,
            "1:demo-master-0.demo-master.ns.svc.cluster.local:17010,\
             2:demo-master-1.demo-master.ns.svc.cluster.local:17010,\
             3:demo-master-2.demo-master.ns.svc.cluster.local:17010"
        );

        let data = desired.config.data.as_ref().unwrap();
        let config: serde_json::Value = serde_json::from_str(&data[CONFIG_FILE]).unwrap();
        assert_eq!(config["peers"], peers);
        assert_eq!(config["id"], "__ID__");
        assert!(data.contains_key(START_SCRIPT));
    }

    #[test]
    fn test_explicit_settings_reach_the_pod() {
        let mut spec = ChubaoClusterSpec::default();
        spec.master.replicas = 1;
        spec.master.update_strategy = "OnDelete".into();
        spec.master.resources.limits.insert("cpu".into(), "2".into());

        let desired = build_default(&spec);
        let ManagedObject::StatefulSet(sts) = &desired.workload else {
            panic!("master must be a StatefulSet");
        };
        let spec = sts.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.update_strategy.as_ref().unwrap().type_.as_deref(),
            Some("OnDelete")
        );

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.host_network, Some(true));
        assert!(pod.containers[0].resources.is_some());
        assert_eq!(
            pod.node_selector.as_ref().unwrap().get("ns-chubao-master"),
            Some(&"enabled".to_string())
        );
        assert_eq!(env_value(sts, "CBFS_PORT").as_deref(), Some("17010"));
    }
}
