//! Prometheus collector
//!
//! Scrape targets are discovered through consul, where every storage daemon
//! registers its exporter.

use k8s_openapi::api::core::v1::{Container, PodSpec};
use serde::Serialize;
use std::collections::BTreeMap;

use super::common::{
    addon_host_path, addon_volumes, cluster_ip_service, config_map, container_port, env, mount,
    resource_requirements, service_port, single_replica_deployment, sub_path_mount,
    CONFIG_VOLUME, DATA_VOLUME, LOG_VOLUME,
};
use super::{ClusterIdentity, DesiredComponent, Endpoints};
use crate::domain::{Component, ManagedObject};
use crate::error::Result;
use crate::resolver::{CommonConfig, PrometheusConfig};

pub const CONFIG_FILE: &str = "prometheus.yml";

const CONFIG_MOUNT: &str = "/etc/prometheus/prometheus.yml";
const DATA_MOUNT: &str = "/prometheus-data";
const LOG_MOUNT: &str = "/var/log/prometheus";
const SCRAPE_INTERVAL: &str = "15s";

// =============================================================================
// prometheus.yml
// =============================================================================

#[derive(Debug, Serialize)]
struct PrometheusFile {
    global: Global,
    scrape_configs: Vec<ScrapeConfig>,
}

#[derive(Debug, Serialize)]
struct Global {
    scrape_interval: String,
    evaluation_interval: String,
}

#[derive(Debug, Serialize)]
struct ScrapeConfig {
    job_name: String,
    consul_sd_configs: Vec<ConsulSdConfig>,
    relabel_configs: Vec<RelabelConfig>,
}

#[derive(Debug, Serialize)]
struct ConsulSdConfig {
    server: String,
}

#[derive(Debug, Serialize)]
struct RelabelConfig {
    source_labels: Vec<String>,
    target_label: String,
}

fn prometheus_yml(endpoints: &Endpoints) -> Result<String> {
    let file = PrometheusFile {
        global: Global {
            scrape_interval: SCRAPE_INTERVAL.to_string(),
            evaluation_interval: SCRAPE_INTERVAL.to_string(),
        },
        scrape_configs: vec![ScrapeConfig {
            job_name: "chubaofs".to_string(),
            consul_sd_configs: vec![ConsulSdConfig {
                server: endpoints.consul_address.clone(),
            }],
            relabel_configs: vec![
                RelabelConfig {
                    source_labels: vec!["__meta_consul_service".to_string()],
                    target_label: "role".to_string(),
                },
                RelabelConfig {
                    source_labels: vec!["__meta_consul_tags".to_string()],
                    target_label: "tags".to_string(),
                },
            ],
        }],
    };
    Ok(serde_yaml::to_string(&file)?)
}

// =============================================================================
// Objects
// =============================================================================

pub fn build(
    common: &CommonConfig,
    prometheus: &PrometheusConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
) -> Result<DesiredComponent> {
    let data = BTreeMap::from([(CONFIG_FILE.to_string(), prometheus_yml(endpoints)?)]);

    Ok(DesiredComponent {
        component: Component::Prometheus,
        config: config_map(id, Component::Prometheus, data),
        endpoint: cluster_ip_service(
            id,
            Component::Prometheus,
            vec![service_port("http", prometheus.port)],
        ),
        workload: ManagedObject::Deployment(single_replica_deployment(
            id,
            Component::Prometheus,
            pod_spec(common, prometheus, id, endpoints),
        )),
    })
}

/// Metrics live under the user-configurable `hostPath`; logs follow the
/// cluster's log directory
fn pod_spec(
    common: &CommonConfig,
    prometheus: &PrometheusConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
) -> PodSpec {
    PodSpec {
        containers: vec![Container {
            name: "prometheus-pod".to_string(),
            image: Some(prometheus.image.clone()),
            image_pull_policy: Some(prometheus.image_pull_policy.clone()),
            args: Some(vec![
                format!("--config.file={}", CONFIG_MOUNT),
                format!("--storage.tsdb.path={}", DATA_MOUNT),
                format!("--web.listen-address=:{}", prometheus.port),
            ]),
            env: Some(vec![env("CONSUL_ADDRESS", &endpoints.consul_url)]),
            ports: Some(vec![container_port("http", prometheus.port)]),
            volume_mounts: Some(vec![
                sub_path_mount(CONFIG_VOLUME, CONFIG_MOUNT, CONFIG_FILE),
                mount(DATA_VOLUME, DATA_MOUNT),
                mount(LOG_VOLUME, LOG_MOUNT),
            ]),
            resources: resource_requirements(&prometheus.resources),
            ..Default::default()
        }],
        volumes: Some(addon_volumes(
            id,
            Component::Prometheus,
            None,
            &prometheus.host_path,
            &addon_host_path(&common.log_dir_host_path, Component::Prometheus),
        )),
        ..Default::default()
    }
}
