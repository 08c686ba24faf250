//! Resolved per-component configuration and the defaults behind it

use super::resolve_or_default;
use crate::crd::{ChubaoClusterSpec, ResourceSpec};
use std::collections::BTreeMap;

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_SERVER_IMAGE: &str = "chubaofs/cfs-server:0.0.1";
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";
pub const DEFAULT_DATA_DIR_HOST_PATH: &str = "/var/lib/chubaofs";
pub const DEFAULT_LOG_DIR_HOST_PATH: &str = "/var/log/chubaofs";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_ZONE_NAME: &str = "default";

pub const DEFAULT_MASTER_REPLICAS: i32 = 3;
pub const DEFAULT_MASTER_CLUSTER_NAME: &str = "rook-chubao-cluster";
pub const DEFAULT_MASTER_RETAIN_LOGS: i32 = 2000;
pub const DEFAULT_MASTER_PORT: i32 = 17010;
pub const DEFAULT_MASTER_PROF: i32 = 17020;
pub const DEFAULT_MASTER_EXPORTER_PORT: i32 = 9500;
pub const DEFAULT_METANODE_RESERVED_MEM: i64 = 67_108_864;
pub const DEFAULT_MASTER_UPDATE_STRATEGY: &str = "RollingUpdate";

pub const DEFAULT_METANODE_TOTAL_MEM: i64 = 2_147_483_648;
pub const DEFAULT_METANODE_PORT: i32 = 17210;
pub const DEFAULT_METANODE_PROF: i32 = 17220;
pub const DEFAULT_METANODE_RAFT_HEARTBEAT: i32 = 17230;
pub const DEFAULT_METANODE_RAFT_REPLICA: i32 = 17240;
pub const DEFAULT_METANODE_EXPORTER_PORT: i32 = 9510;

pub const DEFAULT_DATANODE_PORT: i32 = 17310;
pub const DEFAULT_DATANODE_PROF: i32 = 17320;
pub const DEFAULT_DATANODE_RAFT_HEARTBEAT: i32 = 17330;
pub const DEFAULT_DATANODE_RAFT_REPLICA: i32 = 17340;
pub const DEFAULT_DATANODE_EXPORTER_PORT: i32 = 9520;
pub const DEFAULT_DATANODE_DISK: &str = "/data0:21474836480";

pub const DEFAULT_CONSUL_IMAGE: &str = "consul:1.6.1";
pub const DEFAULT_CONSUL_PORT: i32 = 8500;

pub const DEFAULT_PROMETHEUS_IMAGE: &str = "prom/prometheus:v2.13.1";
pub const DEFAULT_PROMETHEUS_PORT: i32 = 9090;
pub const DEFAULT_PROMETHEUS_HOST_PATH: &str = "/var/lib/chubaofs_prometheus";

pub const DEFAULT_GRAFANA_IMAGE: &str = "grafana/grafana:6.4.4";
pub const DEFAULT_GRAFANA_PORT: i32 = 3000;
pub const DEFAULT_GRAFANA_ADMIN_SECRET: &str = "grafana-admin";

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Settings shared by the storage daemons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonConfig {
    pub server_image: String,
    pub image_pull_policy: String,
    pub data_dir_host_path: String,
    pub log_dir_host_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    pub replicas: i32,
    pub cluster_name: String,
    pub log_level: String,
    pub retain_logs: i32,
    pub port: i32,
    pub prof: i32,
    pub exporter_port: i32,
    pub meta_node_reserved_mem: i64,
    pub update_strategy: String,
    pub node_selector: BTreeMap<String, String>,
    pub resources: ResourceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaNodeConfig {
    pub log_level: String,
    pub total_mem: i64,
    pub port: i32,
    pub prof: i32,
    pub exporter_port: i32,
    pub raft_heartbeat: i32,
    pub raft_replica: i32,
    pub zone_name: String,
    pub node_selector: BTreeMap<String, String>,
    pub resources: ResourceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataNodeConfig {
    pub log_level: String,
    pub port: i32,
    pub prof: i32,
    pub exporter_port: i32,
    pub raft_heartbeat: i32,
    pub raft_replica: i32,
    pub disks: Vec<String>,
    pub zone_name: String,
    pub node_selector: BTreeMap<String, String>,
    pub resources: ResourceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsulConfig {
    pub image: String,
    pub image_pull_policy: String,
    pub port: i32,
    pub resources: ResourceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrometheusConfig {
    pub image: String,
    pub image_pull_policy: String,
    pub port: i32,
    pub host_path: String,
    pub resources: ResourceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrafanaConfig {
    pub image: String,
    pub image_pull_policy: String,
    pub port: i32,
    pub admin_secret: String,
    pub resources: ResourceSpec,
}

/// Fully resolved configuration of every component.
///
/// Recomputed on every reconcile and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCluster {
    pub common: CommonConfig,
    pub master: MasterConfig,
    pub meta_node: MetaNodeConfig,
    pub data_node: DataNodeConfig,
    pub consul: ConsulConfig,
    pub prometheus: PrometheusConfig,
    pub grafana: GrafanaConfig,
}

impl ResolvedCluster {
    /// Resolve every component of a spec
    pub fn resolve(spec: &ChubaoClusterSpec) -> Self {
        Self {
            common: resolve_common(spec),
            master: resolve_master(spec),
            meta_node: resolve_meta_node(spec),
            data_node: resolve_data_node(spec),
            consul: resolve_consul(spec),
            prometheus: resolve_prometheus(spec),
            grafana: resolve_grafana(spec),
        }
    }
}

fn resolve_common(spec: &ChubaoClusterSpec) -> CommonConfig {
    CommonConfig {
        server_image: resolve_or_default(
            &spec.cfs_version.server_image,
            DEFAULT_SERVER_IMAGE.to_string(),
        ),
        image_pull_policy: resolve_or_default(
            &spec.cfs_version.image_pull_policy,
            DEFAULT_IMAGE_PULL_POLICY.to_string(),
        ),
        data_dir_host_path: resolve_or_default(
            &spec.data_dir_host_path,
            DEFAULT_DATA_DIR_HOST_PATH.to_string(),
        ),
        log_dir_host_path: resolve_or_default(
            &spec.log_dir_host_path,
            DEFAULT_LOG_DIR_HOST_PATH.to_string(),
        ),
    }
}

fn resolve_master(spec: &ChubaoClusterSpec) -> MasterConfig {
    let m = &spec.master;
    MasterConfig {
        replicas: resolve_or_default(&m.replicas, DEFAULT_MASTER_REPLICAS),
        cluster_name: resolve_or_default(&m.cluster, DEFAULT_MASTER_CLUSTER_NAME.to_string()),
        log_level: resolve_or_default(&m.log_level, DEFAULT_LOG_LEVEL.to_string()),
        retain_logs: resolve_or_default(&m.retain_logs, DEFAULT_MASTER_RETAIN_LOGS),
        port: resolve_or_default(&m.port, DEFAULT_MASTER_PORT),
        prof: resolve_or_default(&m.prof, DEFAULT_MASTER_PROF),
        exporter_port: resolve_or_default(&m.exporter_port, DEFAULT_MASTER_EXPORTER_PORT),
        meta_node_reserved_mem: resolve_or_default(
            &m.meta_node_reserved_mem,
            DEFAULT_METANODE_RESERVED_MEM,
        ),
        update_strategy: resolve_or_default(
            &m.update_strategy,
            DEFAULT_MASTER_UPDATE_STRATEGY.to_string(),
        ),
        node_selector: m.node_selector.clone(),
        resources: m.resources.clone(),
    }
}

fn resolve_meta_node(spec: &ChubaoClusterSpec) -> MetaNodeConfig {
    let m = &spec.meta_node;
    MetaNodeConfig {
        log_level: resolve_or_default(&m.log_level, DEFAULT_LOG_LEVEL.to_string()),
        total_mem: resolve_or_default(&m.total_mem, DEFAULT_METANODE_TOTAL_MEM),
        port: resolve_or_default(&m.port, DEFAULT_METANODE_PORT),
        prof: resolve_or_default(&m.prof, DEFAULT_METANODE_PROF),
        exporter_port: resolve_or_default(&m.exporter_port, DEFAULT_METANODE_EXPORTER_PORT),
        raft_heartbeat: resolve_or_default(&m.raft_heartbeat, DEFAULT_METANODE_RAFT_HEARTBEAT),
        raft_replica: resolve_or_default(&m.raft_replica, DEFAULT_METANODE_RAFT_REPLICA),
        zone_name: resolve_or_default(&m.zone_name, DEFAULT_ZONE_NAME.to_string()),
        node_selector: m.node_selector.clone(),
        resources: m.resources.clone(),
    }
}

fn resolve_data_node(spec: &ChubaoClusterSpec) -> DataNodeConfig {
    let d = &spec.data_node;
    DataNodeConfig {
        log_level: resolve_or_default(&d.log_level, DEFAULT_LOG_LEVEL.to_string()),
        port: resolve_or_default(&d.port, DEFAULT_DATANODE_PORT),
        prof: resolve_or_default(&d.prof, DEFAULT_DATANODE_PROF),
        exporter_port: resolve_or_default(&d.exporter_port, DEFAULT_DATANODE_EXPORTER_PORT),
        raft_heartbeat: resolve_or_default(&d.raft_heartbeat, DEFAULT_DATANODE_RAFT_HEARTBEAT),
        raft_replica: resolve_or_default(&d.raft_replica, DEFAULT_DATANODE_RAFT_REPLICA),
        disks: resolve_or_default(&d.disks, vec![DEFAULT_DATANODE_DISK.to_string()]),
        zone_name: resolve_or_default(&d.zone_name, DEFAULT_ZONE_NAME.to_string()),
        node_selector: d.node_selector.clone(),
        resources: d.resources.clone(),
    }
}

fn resolve_consul(spec: &ChubaoClusterSpec) -> ConsulConfig {
    let c = &spec.consul;
    ConsulConfig {
        image: resolve_or_default(&c.image, DEFAULT_CONSUL_IMAGE.to_string()),
        image_pull_policy: resolve_or_default(
            &c.image_pull_policy,
            DEFAULT_IMAGE_PULL_POLICY.to_string(),
        ),
        port: resolve_or_default(&c.port, DEFAULT_CONSUL_PORT),
        resources: c.resources.clone(),
    }
}

fn resolve_prometheus(spec: &ChubaoClusterSpec) -> PrometheusConfig {
    let p = &spec.monitor.prometheus;
    PrometheusConfig {
        image: resolve_or_default(&p.image, DEFAULT_PROMETHEUS_IMAGE.to_string()),
        image_pull_policy: resolve_or_default(
            &p.image_pull_policy,
            DEFAULT_IMAGE_PULL_POLICY.to_string(),
        ),
        port: resolve_or_default(&p.port, DEFAULT_PROMETHEUS_PORT),
        host_path: resolve_or_default(&p.host_path, DEFAULT_PROMETHEUS_HOST_PATH.to_string()),
        resources: p.resources.clone(),
    }
}

fn resolve_grafana(spec: &ChubaoClusterSpec) -> GrafanaConfig {
    let g = &spec.monitor.grafana;
    GrafanaConfig {
        image: resolve_or_default(&g.image, DEFAULT_GRAFANA_IMAGE.to_string()),
        image_pull_policy: resolve_or_default(
            &g.image_pull_policy,
            DEFAULT_IMAGE_PULL_POLICY.to_string(),
        ),
        port: resolve_or_default(&g.port, DEFAULT_GRAFANA_PORT),
        admin_secret: resolve_or_default(&g.admin_secret, DEFAULT_GRAFANA_ADMIN_SECRET.to_string()),
        resources: g.resources.clone(),
    }
}
