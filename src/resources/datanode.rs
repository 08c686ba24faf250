//! DataNode daemons

use k8s_openapi::api::core::v1::{Container, PodSpec};
use serde_json::json;
use std::collections::BTreeMap;

use super::common::{
    config_map, container_port, daemon_set, env, field_env, headless_service, host_path_volume,
    mount, privileged, resource_requirements, service_port, start_command, start_script,
    storage_node_selector, storage_volumes, DATA_PATH, LOG_PATH, START_SCRIPT,
};
use super::{ClusterIdentity, DesiredComponent, Endpoints};
use crate::domain::{Component, ManagedObject};
use crate::error::Result;
use crate::resolver::{CommonConfig, DataNodeConfig};

const ROLE: &str = "datanode";
pub const CONFIG_FILE: &str = "datanode.json";

pub fn build(
    common: &CommonConfig,
    data: &DataNodeConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
) -> Result<DesiredComponent> {
    let pod = pod_spec(common, data, id, endpoints);

    Ok(DesiredComponent {
        component: Component::DataNode,
        config: config_map(id, Component::DataNode, config_data(data, endpoints)?),
        endpoint: headless_service(
            id,
            Component::DataNode,
            vec![
                service_port("port", data.port),
                service_port("prof", data.prof),
                service_port("raft-heartbeat", data.raft_heartbeat),
                service_port("raft-replica", data.raft_replica),
                service_port("exporter-port", data.exporter_port),
            ],
        ),
        workload: ManagedObject::DaemonSet(daemon_set(id, Component::DataNode, pod)),
    })
}

/// Mount path of a "<path>:<reserved bytes>" disk entry
fn disk_path(disk: &str) -> &str {
    disk.split_once(':').map(|(path, _)| path).unwrap_or(disk)
}

fn config_data(data: &DataNodeConfig, endpoints: &Endpoints) -> Result<BTreeMap<String, String>> {
    let config = json!({
        "role": ROLE,
        "localIP": "__IP__",
        "listen": data.port.to_string(),
        "prof": data.prof.to_string(),
        "raftHeartbeat": data.raft_heartbeat.to_string(),
        "raftReplica": data.raft_replica.to_string(),
        "raftDir": format!("{}/{}/raft", DATA_PATH, ROLE),
        "logDir": format!("{}/{}", LOG_PATH, ROLE),
        "logLevel": data.log_level,
        "disks": data.disks,
        "masterAddr": endpoints.master_addresses,
        "exporterPort": data.exporter_port,
        "consulAddr": endpoints.consul_url,
        "zoneName": data.zone_name,
    });

    Ok(BTreeMap::from([
        (CONFIG_FILE.to_string(), serde_json::to_string_pretty(&config)?),
        (START_SCRIPT.to_string(), start_script(ROLE, false)),
    ]))
}

fn pod_spec(
    common: &CommonConfig,
    data: &DataNodeConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
) -> PodSpec {
    let (mut volumes, mut mounts) = storage_volumes(
        id,
        Component::DataNode,
        &common.data_dir_host_path,
        &common.log_dir_host_path,
    );

    // Each disk is mounted at the same path it has on the host
    for (i, disk) in data.disks.iter().enumerate() {
        let name = format!("disk-{}", i);
        let path = disk_path(disk);
        volumes.push(host_path_volume(&name, path));
        mounts.push(mount(&name, path));
    }

    PodSpec {
        node_selector: Some(storage_node_selector(
            &id.namespace,
            Component::DataNode,
            &data.node_selector,
        )),
        host_network: Some(true),
        host_pid: Some(true),
        dns_policy: Some("ClusterFirstWithHostNet".to_string()),
        containers: vec![Container {
            name: "datanode-pod".to_string(),
            image: Some(common.server_image.clone()),
            image_pull_policy: Some(common.image_pull_policy.clone()),
            security_context: Some(privileged()),
            command: Some(start_command()),
            env: Some(vec![
                env("CBFS_PORT", data.port),
                env("CBFS_PROF", data.prof),
                env("CBFS_RAFT_HEARTBEAT_PORT", data.raft_heartbeat),
                env("CBFS_RAFT_REPLICA_PORT", data.raft_replica),
                env("CBFS_EXPORTER_PORT", data.exporter_port),
                env("CBFS_MASTER_ADDRS", endpoints.master_addresses.join(",")),
                env("CBFS_LOG_LEVEL", &data.log_level),
                env("CBFS_DISKS", data.disks.join(",")),
                env("CBFS_CONSUL_ADDR", &endpoints.consul_url),
                field_env("POD_IP", "status.podIP"),
                field_env("POD_NAME", "metadata.name"),
            ]),
            ports: Some(vec![
                container_port("port", data.port),
                container_port("prof", data.prof),
                container_port("raft-heartbeat", data.raft_heartbeat),
                container_port("raft-replica", data.raft_replica),
                container_port("exporter-port", data.exporter_port),
            ]),
            volume_mounts: Some(mounts),
            resources: resource_requirements(&data.resources),
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

    #[test]
    fn test_disk_path() {
        assert_eq!(disk_path("/data0:21474836480"), "/data0");
        assert_eq!(disk_path("/data1"), "/data1");
    }

    #[test]
    fn test_disks_become_host_mounts() {
        let mut spec = ChubaoClusterSpec::default();
        spec.data_node.disks = vec!["/data0:0".into(), "/data1:1024".into()];
        let resolved = ResolvedCluster::resolve(&spec);
        let id = test_identity();
        let endpoints = Endpoints::derive(&resolved, &id);
        let desired = build(&resolved.common, &resolved.data_node, &id, &endpoints).unwrap();

        let ManagedObject::DaemonSet(ds) = &desired.workload else {
            panic!("datanode must be a DaemonSet");
        };
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let mounts = pod.containers[0].volume_mounts.as_ref().unwrap();
        assert!(mounts.iter().any(|m| m.mount_path == "/data1"));
        assert_eq!(pod.volumes.as_ref().unwrap().len(), 5);

        let data = desired.config.data.as_ref().unwrap();
        let config: serde_json::Value = serde_json::from_str(&data[CONFIG_FILE]).unwrap();
        assert_eq!(config["disks"][1], "/data1:1024");
    }
}
