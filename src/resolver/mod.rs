//! Config Resolver
//!
//! Merges a partially specified [`ChubaoClusterSpec`] with the named
//! defaults into one fully resolved configuration per component. Resolution
//! is pure and total: every field has a static default, so it never fails.
//! [`validate`] is the separate, reserved check for specs that defaulting
//! cannot repair.

pub mod components;

pub use components::*;

use crate::crd::ChubaoClusterSpec;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

// =============================================================================
// Generic Defaulting
// =============================================================================

/// A value whose zero form means "not specified"
pub trait Unset {
    fn is_unset(&self) -> bool;
}

impl Unset for i32 {
    fn is_unset(&self) -> bool {
        *self == 0
    }
}

impl Unset for i64 {
    fn is_unset(&self) -> bool {
        *self == 0
    }
}

impl Unset for String {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl<T> Unset for Vec<T> {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> Unset for BTreeMap<K, V> {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

/// The explicit value if it is set, otherwise the default
pub fn resolve_or_default<T>(value: &T, default: T) -> T
where
    T: Unset + Clone,
{
    if value.is_unset() {
        default
    } else {
        value.clone()
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Reject values that defaulting cannot repair
pub fn validate(spec: &ChubaoClusterSpec) -> Result<()> {
    let mut problems = Vec::new();

    if spec.master.replicas < 0 {
        problems.push(format!("master.replicas must not be negative (got {})", spec.master.replicas));
    }

    let ports = [
        ("master.port", spec.master.port),
        ("master.prof", spec.master.prof),
        ("master.exporterPort", spec.master.exporter_port),
        ("metaNode.port", spec.meta_node.port),
        ("metaNode.prof", spec.meta_node.prof),
        ("metaNode.exporterPort", spec.meta_node.exporter_port),
        ("metaNode.raftHeartbeat", spec.meta_node.raft_heartbeat),
        ("metaNode.raftReplica", spec.meta_node.raft_replica),
        ("dataNode.port", spec.data_node.port),
        ("dataNode.prof", spec.data_node.prof),
        ("dataNode.exporterPort", spec.data_node.exporter_port),
        ("dataNode.raftHeartbeat", spec.data_node.raft_heartbeat),
        ("dataNode.raftReplica", spec.data_node.raft_replica),
        ("consul.port", spec.consul.port),
        ("monitor.prometheus.port", spec.monitor.prometheus.port),
        ("monitor.grafana.port", spec.monitor.grafana.port),
    ];
    for (field, port) in ports {
        if port != 0 && !(1..=65535).contains(&port) {
            problems.push(format!("{} must be within 1..=65535 (got {})", field, port));
        }
    }

    if spec.master.meta_node_reserved_mem < 0 {
        problems.push("master.metaNodeReservedMem must not be negative".to_string());
    }
    if spec.meta_node.total_mem < 0 {
        problems.push("metaNode.totalMem must not be negative".to_string());
    }

    if !spec.master.update_strategy.is_empty()
        && !matches!(spec.master.update_strategy.as_str(), "RollingUpdate" | "OnDelete")
    {
        problems.push(format!(
            "master.updateStrategy must be RollingUpdate or OnDelete (got {})",
            spec.master.update_strategy
        ));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Configuration(problems.join("; ")))
    }
}
