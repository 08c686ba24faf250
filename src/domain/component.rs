//! Sub-components of a ChubaoFS cluster

use serde::{Deserialize, Serialize};

/// One of the fixed set of processes a ChubaoCluster is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Service discovery for the exporters scraped by Prometheus
    Consul,
    /// Replicated control plane (raft group)
    Master,
    /// Metadata partitions
    MetaNode,
    /// Data partitions
    DataNode,
    /// Metrics collector
    Prometheus,
    /// Metrics dashboard
    Grafana,
}

impl Component {
    /// Every component, in apply order: dependencies first
    pub const ALL: [Component; 6] = [
        Component::Consul,
        Component::Master,
        Component::MetaNode,
        Component::DataNode,
        Component::Prometheus,
        Component::Grafana,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Consul => "consul",
            Component::Master => "master",
            Component::MetaNode => "metanode",
            Component::DataNode => "datanode",
            Component::Prometheus => "prometheus",
            Component::Grafana => "grafana",
        }
    }

    /// Whether the component is part of the storage data/control plane
    /// (as opposed to the monitoring and coordination add-ons)
    pub fn is_storage_daemon(&self) -> bool {
        matches!(
            self,
            Component::Master | Component::MetaNode | Component::DataNode
        )
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
