//! Common resource generation utilities
//!
//! Labels, object metadata, volumes, environment and port helpers shared by
//! every component builder.

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, Deployment, DeploymentSpec,
    DeploymentStrategy,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, ContainerPort, EnvVar, EnvVarSource, HostPathVolumeSource,
    KeyToPath, ObjectFieldSelector, PodSpec, PodTemplateSpec, ResourceRequirements,
    SecretKeySelector, SecurityContext, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use super::ClusterIdentity;
use crate::crd::ResourceSpec;
use crate::domain::Component;

// =============================================================================
// Constants
// =============================================================================

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_CLUSTER: &str = "chubao.rook.io/cluster";

pub const MANAGER_NAME: &str = "chubao-operator";
pub const PART_OF: &str = "chubaofs";

/// Volume and mount path of the per-component ConfigMap
pub const CONFIG_VOLUME: &str = "config";
pub const CONFIG_PATH: &str = "/cfs/conf";

pub const DATA_VOLUME: &str = "pod-data-path";
pub const DATA_PATH: &str = "/cfs/data";
pub const LOG_VOLUME: &str = "pod-log-path";
pub const LOG_PATH: &str = "/cfs/logs";

/// Script entry point shipped in every storage daemon ConfigMap
pub const START_SCRIPT: &str = "start.sh";

const HOST_PATH_TYPE: &str = "DirectoryOrCreate";
const CONFIG_DEFAULT_MODE: i32 = 0o555;

// =============================================================================
// Naming
// =============================================================================

/// Name of a component's Service and workload
pub fn object_name(cluster: &str, component: Component) -> String {
    format!("{}-{}", cluster, component)
}

/// Name of a component's ConfigMap
pub fn config_name(cluster: &str, component: Component) -> String {
    format!("{}-{}-config", cluster, component)
}

// =============================================================================
// Labels & Metadata
// =============================================================================

/// Narrow label set identifying one cluster's instances of one component.
/// Used as the selector.
pub fn selector_labels(cluster: &str, component: Component) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster.to_string()),
        (LABEL_COMPONENT.to_string(), component.to_string()),
    ])
}

/// Broad operator labels plus the narrow selector labels
pub fn standard_labels(cluster: &str, component: Component) -> BTreeMap<String, String> {
    let mut labels = selector_labels(cluster, component);
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGER_NAME.to_string());
    labels.insert(LABEL_PART_OF.to_string(), PART_OF.to_string());
    labels
}

/// Metadata of an owned object
pub fn object_meta(id: &ClusterIdentity, name: String, component: Component) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(id.namespace.clone()),
        labels: Some(standard_labels(&id.name, component)),
        owner_references: Some(vec![id.owner.clone()]),
        ..Default::default()
    }
}

pub fn label_selector(id: &ClusterIdentity, component: Component) -> LabelSelector {
    LabelSelector {
        match_labels: Some(selector_labels(&id.name, component)),
        ..Default::default()
    }
}

/// Pod template metadata. Carries the standard labels, not the owner.
pub fn pod_meta(id: &ClusterIdentity, component: Component) -> ObjectMeta {
    ObjectMeta {
        labels: Some(standard_labels(&id.name, component)),
        ..Default::default()
    }
}

// =============================================================================
// ConfigMaps & Services
// =============================================================================

pub fn config_map(
    id: &ClusterIdentity,
    component: Component,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(id, config_name(&id.name, component), component),
        data: Some(data),
        ..Default::default()
    }
}

/// Headless Service; DNS resolves straight to the pods.
///
/// Not-ready addresses are published so raft peers can find each other
/// while the group is still forming.
pub fn headless_service(id: &ClusterIdentity, component: Component, ports: Vec<ServicePort>) -> Service {
    Service {
        metadata: object_meta(id, object_name(&id.name, component), component),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector_labels(&id.name, component)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn cluster_ip_service(id: &ClusterIdentity, component: Component, ports: Vec<ServicePort>) -> Service {
    Service {
        metadata: object_meta(id, object_name(&id.name, component), component),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(&id.name, component)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

// =============================================================================
// Workloads
// =============================================================================

/// One pod per labelled node, rolled on update
pub fn daemon_set(id: &ClusterIdentity, component: Component, pod: PodSpec) -> DaemonSet {
    DaemonSet {
        metadata: object_meta(id, object_name(&id.name, component), component),
        spec: Some(DaemonSetSpec {
            selector: label_selector(id, component),
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(pod_meta(id, component)),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Fixed single replica with a rolling update strategy
pub fn single_replica_deployment(id: &ClusterIdentity, component: Component, pod: PodSpec) -> Deployment {
    Deployment {
        metadata: object_meta(id, object_name(&id.name, component), component),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            selector: label_selector(id, component),
            template: PodTemplateSpec {
                metadata: Some(pod_meta(id, component)),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Containers
// =============================================================================

pub fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

pub fn env(name: &str, value: impl ToString) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Environment variable from the downward API
pub fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.to_string()),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn privileged() -> SecurityContext {
    SecurityContext {
        privileged: Some(true),
        ..Default::default()
    }
}

/// Convert quantity strings into container resource requirements
pub fn resource_requirements(spec: &ResourceSpec) -> Option<ResourceRequirements> {
    if spec.is_empty() {
        return None;
    }

    let quantities = |m: &BTreeMap<String, String>| {
        if m.is_empty() {
            None
        } else {
            Some(
                m.iter()
                    .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                    .collect::<BTreeMap<_, _>>(),
            )
        }
    };

    Some(ResourceRequirements {
        limits: quantities(&spec.limits),
        requests: quantities(&spec.requests),
        ..Default::default()
    })
}

// =============================================================================
// Volumes
// =============================================================================

pub fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: Some(HOST_PATH_TYPE.to_string()),
        }),
        ..Default::default()
    }
}

/// The component's ConfigMap as a volume, optionally projecting keys to paths
pub fn config_volume(id: &ClusterIdentity, component: Component, items: Option<Vec<KeyToPath>>) -> Volume {
    Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_name(&id.name, component)),
            default_mode: Some(CONFIG_DEFAULT_MODE),
            items,
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

pub fn sub_path_mount(name: &str, path: &str, sub_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        sub_path: Some(sub_path.to_string()),
        ..Default::default()
    }
}

/// Data, log and config volumes of a storage daemon
pub fn storage_volumes(
    id: &ClusterIdentity,
    component: Component,
    data_dir: &str,
    log_dir: &str,
) -> (Vec<Volume>, Vec<VolumeMount>) {
    let volumes = vec![
        host_path_volume(DATA_VOLUME, data_dir),
        host_path_volume(LOG_VOLUME, log_dir),
        config_volume(id, component, None),
    ];
    let mounts = vec![
        mount(DATA_VOLUME, DATA_PATH),
        mount(LOG_VOLUME, LOG_PATH),
        mount(CONFIG_VOLUME, CONFIG_PATH),
    ];
    (volumes, mounts)
}

/// Host directory of a monitoring add-on below one of the cluster's host
/// paths, e.g. `/var/lib/chubaofs/consul`
pub fn addon_host_path(base: &str, component: Component) -> String {
    format!("{}/{}", base.trim_end_matches('/'), component)
}

/// Config source plus host-backed data and log directories of an add-on.
/// Mount paths are image specific and left to the caller.
pub fn addon_volumes(
    id: &ClusterIdentity,
    component: Component,
    items: Option<Vec<KeyToPath>>,
    data_dir: &str,
    log_dir: &str,
) -> Vec<Volume> {
    vec![
        config_volume(id, component, items),
        host_path_volume(DATA_VOLUME, data_dir),
        host_path_volume(LOG_VOLUME, log_dir),
    ]
}

/// Node selector for a storage daemon; `{namespace}-chubao-{component}=enabled`
/// unless the user gave one
pub fn storage_node_selector(
    namespace: &str,
    component: Component,
    given: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    if !given.is_empty() {
        return given.clone();
    }
    BTreeMap::from([(
        format!("{}-chubao-{}", namespace, component),
        "enabled".to_string(),
    )])
}

// =============================================================================
// Storage Daemon Start Script
// =============================================================================

/// Launch script for a cfs-server role.
///
/// Substitutes the pod IP (and, for ordinal workloads, the 1-based raft id)
/// into the mounted config template before exec'ing the server.
pub fn start_script(role: &str, with_ordinal_id: bool) -> String {
    let mut script = String::from("#!/bin/bash\nset -ex\n");
    let mut sed = String::from("sed -e \"s/__IP__/${POD_IP}/g\"");
    if with_ordinal_id {
        script.push_str("ordinal=\"${POD_NAME##*-}\"\n");
        sed.push_str(" -e \"s/__ID__/$((ordinal + 1))/g\"");
    }
    script.push_str(&format!(
        "mkdir -p {data}/{role}\n{sed} {conf}/{role}.json > {data}/{role}/{role}.json\n\
         exec /cfs/bin/cfs-server -f -c {data}/{role}/{role}.json\n",
        data = DATA_PATH,
        conf = CONFIG_PATH,
    ));
    script
}

/// Container command that runs [`start_script`] from the config mount
pub fn start_command() -> Vec<String> {
    vec!["/bin/bash".to_string(), format!("{}/{}", CONFIG_PATH, START_SCRIPT)]
}
