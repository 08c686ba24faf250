//! Consul agent
//!
//! Single-node server the storage daemons register their exporters with;
//! Prometheus discovers scrape targets through it.

use k8s_openapi::api::core::v1::{Container, PodSpec};
use serde_json::json;
use std::collections::BTreeMap;

use super::common::{
    addon_host_path, addon_volumes, cluster_ip_service, config_map, container_port, mount,
    resource_requirements, service_port, single_replica_deployment, CONFIG_VOLUME, DATA_VOLUME,
    LOG_VOLUME,
};
use super::{ClusterIdentity, DesiredComponent};
use crate::domain::{Component, ManagedObject};
use crate::error::Result;
use crate::resolver::{CommonConfig, ConsulConfig};

pub const CONFIG_FILE: &str = "consul.json";

const CONFIG_DIR: &str = "/consul/config";
const DATA_DIR: &str = "/consul/data";
const LOG_DIR: &str = "/consul/logs";

pub fn build(
    common: &CommonConfig,
    consul: &ConsulConfig,
    id: &ClusterIdentity,
) -> Result<DesiredComponent> {
    Ok(DesiredComponent {
        component: Component::Consul,
        config: config_map(id, Component::Consul, config_data(consul)?),
        endpoint: cluster_ip_service(id, Component::Consul, vec![service_port("http", consul.port)]),
        workload: ManagedObject::Deployment(single_replica_deployment(
            id,
            Component::Consul,
            pod_spec(common, consul, id),
        )),
    })
}

fn config_data(consul: &ConsulConfig) -> Result<BTreeMap<String, String>> {
    let config = json!({
        "datacenter": "dc1",
        "data_dir": DATA_DIR,
        "log_file": format!("{}/", LOG_DIR),
        "client_addr": "0.0.0.0",
        "server": true,
        "bootstrap_expect": 1,
        "ui": true,
        "ports": { "http": consul.port },
    });

    Ok(BTreeMap::from([(
        CONFIG_FILE.to_string(),
        serde_json::to_string_pretty(&config)?,
    )]))
}

fn pod_spec(common: &CommonConfig, consul: &ConsulConfig, id: &ClusterIdentity) -> PodSpec {
    PodSpec {
        containers: vec![Container {
            name: "consul-pod".to_string(),
            image: Some(consul.image.clone()),
            image_pull_policy: Some(consul.image_pull_policy.clone()),
            args: Some(vec![
                "agent".to_string(),
                format!("-config-file={}/{}", CONFIG_DIR, CONFIG_FILE),
            ]),
            ports: Some(vec![container_port("http", consul.port)]),
            volume_mounts: Some(vec![
                mount(CONFIG_VOLUME, CONFIG_DIR),
                mount(DATA_VOLUME, DATA_DIR),
                mount(LOG_VOLUME, LOG_DIR),
            ]),
            resources: resource_requirements(&consul.resources),
            ..Default::default()
        }],
        volumes: Some(addon_volumes(
            id,
            Component::Consul,
            None,
            &addon_host_path(&common.data_dir_host_path, Component::Consul),
            &addon_host_path(&common.log_dir_host_path, Component::Consul),
        )),
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
    fn test_consul_deployment() {
        let mut spec = ChubaoClusterSpec::default();
        spec.consul.port = 8600;
        let resolved = ResolvedCluster::resolve(&spec);
        let desired = build(&resolved.common, &resolved.consul, &test_identity()).unwrap();

        let ManagedObject::Deployment(deploy) = &desired.workload else {
            panic!("consul must be a Deployment");
        };
        let deploy_spec = deploy.spec.as_ref().unwrap();
        assert_eq!(deploy_spec.replicas, Some(1));
        assert_eq!(
            deploy_spec.strategy.as_ref().unwrap().type_.as_deref(),
            Some("RollingUpdate")
        );

        let svc = desired.endpoint.spec.as_ref().unwrap();
        assert_eq!(svc.ports.as_ref().unwrap()[0].port, 8600);

        let data = desired.config.data.as_ref().unwrap();
        let config: serde_json::Value = serde_json::from_str(&data[CONFIG_FILE]).unwrap();
        assert_eq!(config["ports"]["http"], 8600);
        assert_eq!(config["log_file"], "/consul/logs/");

        let pod = deploy_spec.template.spec.as_ref().unwrap();
        let data = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == DATA_VOLUME)
            .and_then(|v| v.host_path.as_ref())
            .unwrap();
        assert_eq!(data.path, "/var/lib/chubaofs/consul");
    }
}
