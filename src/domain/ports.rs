//! Domain Ports - Core trait definitions for the operator
//!
//! These traits define the boundaries between the reconciliation engine and
//! the systems it talks to. Adapters implement them: `store::KubeStore` and
//! `store::InMemoryStore` for the object store, `controller::health` for
//! health reporting and `controller::events` for diagnostic events.

use crate::crd::{ChubaoCluster, ChubaoClusterStatus, HealthMessage};
use crate::domain::component::Component;
use crate::domain::object::{ManagedObject, ObjectKey, ObjectKind};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// =============================================================================
// Resource Store Port
// =============================================================================

/// Port for the remote, eventually-consistent object store
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Load a cluster, `None` once it has been deleted
    async fn get_cluster(&self, key: &ObjectKey) -> StoreResult<Option<ChubaoCluster>>;

    /// Write the status subresource of a cluster
    async fn update_cluster_status(
        &self,
        key: &ObjectKey,
        status: &ChubaoClusterStatus,
    ) -> StoreResult<()>;

    /// Create an object; `StoreError::AlreadyExists` if the name is taken
    async fn create(&self, object: &ManagedObject) -> StoreResult<()>;

    /// Replace an existing object with the given desired state.
    ///
    /// Must not change the object's generation when the desired state is
    /// identical to what is stored.
    async fn update(&self, object: &ManagedObject) -> StoreResult<()>;

    /// Read an object back
    async fn get(&self, kind: ObjectKind, key: &ObjectKey) -> StoreResult<Option<ManagedObject>>;
}

// =============================================================================
// Health Reporter Port
// =============================================================================

/// The workload a component runs as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub component: Component,
    pub kind: ObjectKind,
    pub key: ObjectKey,
}

/// Port for per-subsystem health reports
#[async_trait]
pub trait HealthReporter: Send + Sync {
    /// Report a severity/message pair per subsystem
    async fn report(
        &self,
        cluster: &ChubaoCluster,
        workloads: &[WorkloadRef],
    ) -> BTreeMap<String, HealthMessage>;
}

// =============================================================================
// Event Sink Port
// =============================================================================

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Human-readable diagnostic event attached to a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub kind: EventKind,
    /// Machine-readable reason, CamelCase
    pub reason: String,
    /// What the operator was doing
    pub action: String,
    pub message: String,
}

impl DiagnosticEvent {
    pub fn normal(reason: &str, action: &str, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Normal,
            reason: reason.to_string(),
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn warning(reason: &str, action: &str, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            reason: reason.to_string(),
            action: action.to_string(),
            message: message.into(),
        }
    }
}

/// Port for diagnostic event emission. Failures are the sink's problem:
/// events are not required for correctness.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, cluster: &ChubaoCluster, event: DiagnosticEvent);
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ResourceStoreRef = Arc<dyn ResourceStore>;
pub type HealthReporterRef = Arc<dyn HealthReporter>;
pub type EventSinkRef = Arc<dyn EventSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let ev = DiagnosticEvent::warning("ApplyFailed", "Reconciling", "boom");
        assert_eq!(ev.kind, EventKind::Warning);
        assert_eq!(ev.reason, "ApplyFailed");

        let ev = DiagnosticEvent::normal("StateChanged", "Reconciling", "ok");
        assert_eq!(ev.kind, EventKind::Normal);
    }
}
