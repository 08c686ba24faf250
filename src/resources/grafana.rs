//! Grafana dashboard server
//!
//! Provisioned with a Prometheus datasource whose URL is handed in by the
//! caller, plus any dashboards fetched at startup. Admin credentials come
//! from a user-supplied Secret and are never written by the operator.

use k8s_openapi::api::core::v1::{Container, HTTPGetAction, KeyToPath, PodSpec, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;
use std::collections::BTreeMap;

use super::common::{
    addon_host_path, addon_volumes, cluster_ip_service, config_map, container_port, env, mount,
    resource_requirements, secret_env, service_port, single_replica_deployment, CONFIG_VOLUME,
    DATA_VOLUME, LOG_VOLUME,
};
use super::{ClusterIdentity, DesiredComponent, Endpoints};
use crate::dashboards::Dashboards;
use crate::domain::{Component, ManagedObject};
use crate::error::Result;
use crate::resolver::{CommonConfig, GrafanaConfig};

pub const DATASOURCE_FILE: &str = "datasource.yml";
pub const DASHBOARD_PROVIDER_FILE: &str = "dashboard.yml";

/// Keys of the admin credentials Secret
pub const SECRET_USERNAME_KEY: &str = "username";
pub const SECRET_PASSWORD_KEY: &str = "password";

const PROVISIONING_PATH: &str = "/etc/grafana/provisioning";
const DASHBOARDS_PATH: &str = "/etc/grafana/provisioning/dashboards";
const STORAGE_PATH: &str = "/var/lib/grafana";
const LOGS_PATH: &str = "/var/log/grafana";
const READINESS_PATH: &str = "/login";

// =============================================================================
// Provisioning files
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasourceFile {
    api_version: i32,
    delete_datasources: Vec<DeleteDatasource>,
    datasources: Vec<Datasource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteDatasource {
    name: String,
    org_id: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Datasource {
    name: String,
    r#type: String,
    access: String,
    org_id: i32,
    url: String,
    is_default: bool,
    version: i32,
    editable: bool,
}

fn datasource_yml(prometheus_url: &str) -> Result<String> {
    let file = DatasourceFile {
        api_version: 1,
        delete_datasources: vec![DeleteDatasource {
            name: "Prometheus".to_string(),
            org_id: 1,
        }],
        datasources: vec![Datasource {
            name: "Prometheus".to_string(),
            r#type: "prometheus".to_string(),
            access: "proxy".to_string(),
            org_id: 1,
            url: prometheus_url.to_string(),
            is_default: true,
            version: 1,
            editable: true,
        }],
    };
    Ok(serde_yaml::to_string(&file)?)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardProviderFile {
    api_version: i32,
    providers: Vec<DashboardProvider>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardProvider {
    name: String,
    org_id: i32,
    folder: String,
    r#type: String,
    disable_deletion: bool,
    options: BTreeMap<String, String>,
}

/// File-based provider used when no `dashboard.yml` was fetched
fn default_provider_yml() -> Result<String> {
    let file = DashboardProviderFile {
        api_version: 1,
        providers: vec![DashboardProvider {
            name: "chubaofs".to_string(),
            org_id: 1,
            folder: String::new(),
            r#type: "file".to_string(),
            disable_deletion: false,
            options: BTreeMap::from([("path".to_string(), DASHBOARDS_PATH.to_string())]),
        }],
    };
    Ok(serde_yaml::to_string(&file)?)
}

fn config_data(endpoints: &Endpoints, dashboards: &Dashboards) -> Result<BTreeMap<String, String>> {
    let mut data: BTreeMap<String, String> = dashboards
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_string()))
        .collect();

    if !data.contains_key(DASHBOARD_PROVIDER_FILE) {
        data.insert(DASHBOARD_PROVIDER_FILE.to_string(), default_provider_yml()?);
    }
    data.insert(
        DATASOURCE_FILE.to_string(),
        datasource_yml(&endpoints.prometheus_url)?,
    );
    Ok(data)
}

/// Where each ConfigMap key lands under the provisioning directory
fn provisioning_items(data: &BTreeMap<String, String>) -> Vec<KeyToPath> {
    data.keys()
        .map(|key| {
            let path = if key == DATASOURCE_FILE {
                format!("datasources/{}", key)
            } else {
                format!("dashboards/{}", key)
            };
            KeyToPath {
                key: key.clone(),
                path,
                ..Default::default()
            }
        })
        .collect()
}

// =============================================================================
// Objects
// =============================================================================

pub fn build(
    common: &CommonConfig,
    grafana: &GrafanaConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
    dashboards: &Dashboards,
) -> Result<DesiredComponent> {
    let data = config_data(endpoints, dashboards)?;
    let items = provisioning_items(&data);

    Ok(DesiredComponent {
        component: Component::Grafana,
        config: config_map(id, Component::Grafana, data),
        endpoint: cluster_ip_service(id, Component::Grafana, vec![service_port("http", grafana.port)]),
        workload: ManagedObject::Deployment(single_replica_deployment(
            id,
            Component::Grafana,
            pod_spec(common, grafana, id, endpoints, items),
        )),
    })
}

fn pod_spec(
    common: &CommonConfig,
    grafana: &GrafanaConfig,
    id: &ClusterIdentity,
    endpoints: &Endpoints,
    items: Vec<KeyToPath>,
) -> PodSpec {
    PodSpec {
        containers: vec![Container {
            name: "grafana-pod".to_string(),
            image: Some(grafana.image.clone()),
            image_pull_policy: Some(grafana.image_pull_policy.clone()),
            env: Some(vec![
                env("GF_SERVER_HTTP_PORT", grafana.port),
                env("GF_AUTH_BASIC_ENABLED", "true"),
                env("GF_AUTH_ANONYMOUS_ENABLED", "false"),
                env("GF_PATHS_LOGS", LOGS_PATH),
                env("GF_LOG_MODE", "console file"),
                secret_env("GF_SECURITY_ADMIN_USER", &grafana.admin_secret, SECRET_USERNAME_KEY),
                secret_env(
                    "GF_SECURITY_ADMIN_PASSWORD",
                    &grafana.admin_secret,
                    SECRET_PASSWORD_KEY,
                ),
                env("PROMETHEUS_URL", &endpoints.prometheus_url),
            ]),
            ports: Some(vec![container_port("http", grafana.port)]),
            readiness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some(READINESS_PATH.to_string()),
                    port: IntOrString::Int(grafana.port),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            volume_mounts: Some(vec![
                mount(DATA_VOLUME, STORAGE_PATH),
                mount(LOG_VOLUME, LOGS_PATH),
                mount(CONFIG_VOLUME, PROVISIONING_PATH),
            ]),
            resources: resource_requirements(&grafana.resources),
            ..Default::default()
        }],
        volumes: Some(addon_volumes(
            id,
            Component::Grafana,
            Some(items),
            &addon_host_path(&common.data_dir_host_path, Component::Grafana),
            &addon_host_path(&common.log_dir_host_path, Component::Grafana),
        )),
        ..Default::default()
    }
}
