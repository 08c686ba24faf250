//! MetaNode daemons
//!
//! One metadata partition server per labelled node, on the host network.

use k8s_openapi::api::core::v1::{Container, PodSpec};
use serde_json::json;
use std::collections::BTreeMap;

use super::common::{
    config_map, container_port, daemon_set, env, field_env, headless_service, privileged,
    resource_requirements, service_port, start_command, start_script, storage_node_selector,
    storage_volumes, DATA_PATH, LOG_PATH, START_SCRIPT,
};
use super::{ClusterIdentity, DesiredComponent, Endpoints};
use crate::domain::{Component, ManagedObject};
use crate::error::Result;
use crate::resolver::{CommonConfig, MetaNodeConfig};

const ROLE: &str = "metanode";
pub const CONFIG_FILE: &str = "metanode.json";

pub fn build(
    common: &CommonConfig,
    meta: &MetaNodeConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
) -> Result<DesiredComponent> {
    let pod = pod_spec(common, meta, id, endpoints);

    Ok(DesiredComponent {
        component: Component::MetaNode,
        config: config_map(id, Component::MetaNode, config_data(meta, endpoints)?),
        endpoint: headless_service(
            id,
            Component::MetaNode,
            vec![
                service_port("port", meta.port),
                service_port("prof", meta.prof),
                service_port("raft-heartbeat", meta.raft_heartbeat),
                service_port("raft-replica", meta.raft_replica),
                service_port("exporter-port", meta.exporter_port),
            ],
        ),
        workload: ManagedObject::DaemonSet(daemon_set(id, Component::MetaNode, pod)),
    })
}

fn config_data(meta: &MetaNodeConfig, endpoints: &Endpoints) -> Result<BTreeMap<String, String>> {
    let config = json!({
        "role": ROLE,
        "localIP": "__IP__",
        "listen": meta.port.to_string(),
        "prof": meta.prof.to_string(),
        "raftHeartbeatPort": meta.raft_heartbeat.to_string(),
        "raftReplicaPort": meta.raft_replica.to_string(),
        "totalMem": meta.total_mem.to_string(),
        "logDir": format!("{}/{}", LOG_PATH, ROLE),
        "logLevel": meta.log_level,
        "metadataDir": format!("{}/{}/meta", DATA_PATH, ROLE),
        "raftDir": format!("{}/{}/raft", DATA_PATH, ROLE),
        "masterAddr": endpoints.master_addresses,
        "exporterPort": meta.exporter_port,
        "consulAddr": endpoints.consul_url,
        "zoneName": meta.zone_name,
    });

    Ok(BTreeMap::from([
        (CONFIG_FILE.to_string(), serde_json::to_string_pretty(&config)?),
        (START_SCRIPT.to_string(), start_script(ROLE, false)),
    ]))
}

fn pod_spec(
    common: &CommonConfig,
    meta: &MetaNodeConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
) -> PodSpec {
    let (volumes, mounts) = storage_volumes(
        id,
        Component::MetaNode,
        &common.data_dir_host_path,
        &common.log_dir_host_path,
    );

    PodSpec {
        node_selector: Some(storage_node_selector(
            &id.namespace,
            Component::MetaNode,
            &meta.node_selector,
        )),
        host_network: Some(true),
        host_pid: Some(true),
        dns_policy: Some("ClusterFirstWithHostNet".to_string()),
        containers: vec![Container {
            name: "metanode-pod".to_string(),
            image: Some(common.server_image.clone()),
            image_pull_policy: Some(common.image_pull_policy.clone()),
            security_context: Some(privileged()),
            command: Some(start_command()),
            env: Some(vec![
                env("CBFS_PORT", meta.port),
                env("CBFS_PROF", meta.prof),
                env("CBFS_RAFT_HEARTBEAT_PORT", meta.raft_heartbeat),
                env("CBFS_RAFT_REPLICA_PORT", meta.raft_replica),
                env("CBFS_EXPORTER_PORT", meta.exporter_port),
                env("CBFS_MASTER_ADDRS", endpoints.master_addresses.join(",")),
                env("CBFS_LOG_LEVEL", &meta.log_level),
                env("CBFS_TOTAL_MEM", meta.total_mem),
                env("CBFS_CONSUL_ADDR", &endpoints.consul_url),
                field_env("POD_IP", "status.podIP"),
                field_env("POD_NAME", "metadata.name"),
            ]),
            ports: Some(vec![
                container_port("port", meta.port),
                container_port("prof", meta.prof),
                container_port("raft-heartbeat", meta.raft_heartbeat),
                container_port("raft-replica", meta.raft_replica),
                container_port("exporter-port", meta.exporter_port),
            ]),
            volume_mounts: Some(mounts),
            resources: resource_requirements(&meta.resources),
            ..Default::default()
        }],
        volumes: Some(volumes),
        ..Default::default()
    }
}
