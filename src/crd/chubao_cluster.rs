//! ChubaoCluster CRD
//!
//! Declares one ChubaoFS deployment: image versions, per-component settings
//! for the master raft group, metadata and data nodes, and the consul and
//! monitoring add-ons. Every scalar uses its zero value to mean "unset"; the
//! resolver fills in defaults.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// ChubaoCluster CRD
// =============================================================================

/// ChubaoCluster is the declared state of one ChubaoFS cluster. It is created
/// and deleted by users; the operator only writes its status.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chubao.rook.io",
    version = "v1alpha1",
    kind = "ChubaoCluster",
    plural = "chubaoclusters",
    shortname = "cc",
    status = "ChubaoClusterStatus",
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Health", "type": "string", "jsonPath": ".status.chubao.health"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ChubaoClusterSpec {
    /// Server/client image versions
    #[serde(default)]
    pub cfs_version: CfsVersionSpec,

    /// Host directory backing component data
    #[serde(default)]
    pub data_dir_host_path: String,

    /// Host directory backing component logs
    #[serde(default)]
    pub log_dir_host_path: String,

    #[serde(default)]
    pub master: MasterSpec,

    #[serde(default)]
    pub meta_node: MetaNodeSpec,

    #[serde(default)]
    pub data_node: DataNodeSpec,

    #[serde(default)]
    pub consul: ConsulSpec,

    #[serde(default)]
    pub monitor: MonitorSpec,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Versions of the cfs-server software being orchestrated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CfsVersionSpec {
    #[serde(default)]
    pub server_image: String,

    #[serde(default)]
    pub client_image: String,

    /// Always, IfNotPresent or Never
    #[serde(default)]
    pub image_pull_policy: String,
}

/// Compute resources, as Kubernetes quantity strings (e.g. "500m", "2Gi")
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,

    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

impl ResourceSpec {
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.requests.is_empty()
    }
}

/// Master (raft control plane) settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MasterSpec {
    #[serde(default)]
    pub replicas: i32,

    /// ChubaoFS cluster name reported by the masters
    #[serde(default)]
    pub cluster: String,

    #[serde(default)]
    pub log_level: String,

    #[serde(default)]
    pub retain_logs: i32,

    #[serde(default)]
    pub port: i32,

    #[serde(default)]
    pub prof: i32,

    #[serde(default)]
    pub exporter_port: i32,

    #[serde(default)]
    pub meta_node_reserved_mem: i64,

    /// RollingUpdate or OnDelete
    #[serde(default)]
    pub update_strategy: String,

    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default)]
    pub resources: ResourceSpec,
}

/// MetaNode settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetaNodeSpec {
    #[serde(default)]
    pub log_level: String,

    /// Memory available to metadata partitions, in bytes
    #[serde(default)]
    pub total_mem: i64,

    #[serde(default)]
    pub port: i32,

    #[serde(default)]
    pub prof: i32,

    #[serde(default)]
    pub exporter_port: i32,

    #[serde(default)]
    pub raft_heartbeat: i32,

    #[serde(default)]
    pub raft_replica: i32,

    #[serde(default)]
    pub zone_name: String,

    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default)]
    pub resources: ResourceSpec,
}

/// DataNode settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataNodeSpec {
    #[serde(default)]
    pub log_level: String,

    #[serde(default)]
    pub port: i32,

    #[serde(default)]
    pub prof: i32,

    #[serde(default)]
    pub exporter_port: i32,

    #[serde(default)]
    pub raft_heartbeat: i32,

    #[serde(default)]
    pub raft_replica: i32,

    /// Disks as "<mount path>:<reserved bytes>"
    #[serde(default)]
    pub disks: Vec<String>,

    #[serde(default)]
    pub zone_name: String,

    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default)]
    pub resources: ResourceSpec,
}

/// Consul (exporter discovery) settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsulSpec {
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub image_pull_policy: String,

    #[serde(default)]
    pub port: i32,

    #[serde(default)]
    pub resources: ResourceSpec,
}

/// Monitoring stack settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSpec {
    #[serde(default)]
    pub prometheus: PrometheusSpec,

    #[serde(default)]
    pub grafana: GrafanaSpec,
}

/// Prometheus settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub image_pull_policy: String,

    #[serde(default)]
    pub port: i32,

    /// Host directory for the TSDB
    #[serde(default)]
    pub host_path: String,

    #[serde(default)]
    pub resources: ResourceSpec,
}

/// Grafana settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaSpec {
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub image_pull_policy: String,

    #[serde(default)]
    pub port: i32,

    /// Secret holding the admin `username` and `password`
    #[serde(default)]
    pub admin_secret: String,

    #[serde(default)]
    pub resources: ResourceSpec,
}

// =============================================================================
// Status
// =============================================================================

/// Status of the ChubaoCluster. Owned by the operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChubaoClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ClusterState>,

    /// Condition type of the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ConditionType>,

    #[serde(default)]
    pub message: String,

    /// Condition history, one entry per type, never pruned
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,

    /// Aggregated health
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chubao: Option<ChubaoHealth>,

    /// Resolved server image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ClusterVersion>,

    /// Spec generation the status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Cluster lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClusterState {
    Creating,
    Created,
    Updating,
    Connecting,
    Connected,
    Error,
}

impl ClusterState {
    /// Condition type recorded as the phase for this state
    pub fn phase(&self) -> ConditionType {
        match self {
            ClusterState::Creating => ConditionType::Progressing,
            ClusterState::Created => ConditionType::Ready,
            ClusterState::Updating => ConditionType::Updating,
            ClusterState::Connecting => ConditionType::Connecting,
            ClusterState::Connected => ConditionType::Connected,
            ClusterState::Error => ConditionType::Failure,
        }
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::Creating => write!(f, "Creating"),
            ClusterState::Created => write!(f, "Created"),
            ClusterState::Updating => write!(f, "Updating"),
            ClusterState::Connecting => write!(f, "Connecting"),
            ClusterState::Connected => write!(f, "Connected"),
            ClusterState::Error => write!(f, "Error"),
        }
    }
}

/// Condition types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Ignored,
    Connecting,
    Connected,
    Progressing,
    Ready,
    Updating,
    Failure,
    Upgrading,
    Deleting,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A timestamped fact about the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    pub r#type: ConditionType,

    pub status: ConditionStatus,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    /// Last time the condition was observed
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_heartbeat_time: Option<DateTime<Utc>>,

    /// Last time `status` changed
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Aggregated health of the cluster's subsystems
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChubaoHealth {
    /// Most severe of all reported severities
    #[serde(default)]
    pub health: String,

    #[serde(default)]
    pub details: BTreeMap<String, HealthMessage>,

    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_checked: Option<DateTime<Utc>>,

    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_changed: Option<DateTime<Utc>>,

    /// Aggregate health before the last change
    #[serde(default)]
    pub previous_health: String,

    #[serde(default)]
    pub previous_details: BTreeMap<String, HealthMessage>,
}

/// Severity/message pair reported for one subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthMessage {
    pub severity: String,
    pub message: String,
}

impl HealthMessage {
    pub fn new(severity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: severity.into(),
            message: message.into(),
        }
    }
}

/// Image and version the cluster runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersion {
    pub image: String,
    pub version: String,
}

impl ClusterVersion {
    /// Split the tag off an image reference. Untagged images are "latest".
    pub fn from_image(image: &str) -> Self {
        let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
        let version = match image[name_start..].rfind(':') {
            Some(i) => image[name_start + i + 1..].to_string(),
            None => "latest".to_string(),
        };
        Self {
            image: image.to_string(),
            version,
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl ChubaoClusterStatus {
    /// Find a condition by type
    pub fn condition(&self, r#type: ConditionType) -> Option<&ClusterCondition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_state_phase_mapping() {
        assert_eq!(ClusterState::Creating.phase(), ConditionType::Progressing);
        assert_eq!(ClusterState::Created.phase(), ConditionType::Ready);
        assert_eq!(ClusterState::Error.phase(), ConditionType::Failure);
        assert_eq!(ClusterState::Connected.to_string(), "Connected");
    }

    #[test]
    fn test_spec_deserializes_with_missing_sections() {
        let spec: ChubaoClusterSpec = serde_json::from_value(serde_json::json!({
            "dataDirHostPath": "/mnt/cfs",
            "master": { "replicas": 5 }
        }))
        .unwrap();

        assert_eq!(spec.data_dir_host_path, "/mnt/cfs");
        assert_eq!(spec.master.replicas, 5);
        assert_eq!(spec.meta_node.port, 0);
        assert!(spec.data_node.disks.is_empty());
        assert!(spec.monitor.grafana.admin_secret.is_empty());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = ChubaoClusterStatus {
            state: Some(ClusterState::Connecting),
            phase: Some(ConditionType::Connecting),
            observed_generation: Some(2),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "Connecting");
        assert_eq!(value["observedGeneration"], 2);
        assert!(value.get("chubao").is_none());
    }

    #[test]
    fn test_version_from_image() {
        let v = ClusterVersion::from_image("chubaofs/cfs-server:0.0.1");
        assert_eq!(v.version, "0.0.1");

        let v = ClusterVersion::from_image("registry.local:5000/cfs-server");
        assert_eq!(v.version, "latest");
    }

    #[test]
    fn test_crd_identity() {
        assert_eq!(ChubaoCluster::group(&()), "chubao.rook.io");
        assert_eq!(ChubaoCluster::version(&()), "v1alpha1");
        assert_eq!(ChubaoCluster::kind(&()), "ChubaoCluster");
    }
}
