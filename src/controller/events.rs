//! Diagnostic event sinks
//!
//! - [`KubeEventSink`]: Kubernetes Events attached to the ChubaoCluster
//! - [`EventLog`]: in-memory log, used by tests

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use parking_lot::Mutex;
use tracing::warn;

use crate::crd::ChubaoCluster;
use crate::domain::{DiagnosticEvent, EventKind, EventSink, ObjectKey};

/// Reporting controller name on published events
pub const REPORTER: &str = "chubao-operator";

/// Publishes Kubernetes Events through the kube-runtime recorder
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: REPORTER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, cluster: &ChubaoCluster, event: DiagnosticEvent) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            cluster.object_ref(&()),
        );
        let type_ = match event.kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        if let Err(e) = recorder
            .publish(Event {
                type_,
                reason: event.reason.clone(),
                note: Some(event.message),
                action: event.action,
                secondary: None,
            })
            .await
        {
            warn!(reason = %event.reason, error = %e, "Failed to publish event");
        }
    }
}

/// Keeps every published event in memory
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<(ObjectKey, DiagnosticEvent)>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(ObjectKey, DiagnosticEvent)> {
        self.events.lock().clone()
    }

    /// Reasons of the events published for one cluster, oldest first
    pub fn reasons(&self, key: &ObjectKey) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, e)| e.reason.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventSink for EventLog {
    async fn publish(&self, cluster: &ChubaoCluster, event: DiagnosticEvent) {
        self.events.lock().push((ObjectKey::of(cluster), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::tests::test_cluster;

    #[tokio::test]
    async fn test_event_log_is_per_cluster() {
        let log = EventLog::new();
        let demo = test_cluster("ns", "demo");
        let other = test_cluster("ns", "other");

        log.publish(&demo, DiagnosticEvent::normal("StateChanged", "Reconciling", "Creating"))
            .await;
        log.publish(&other, DiagnosticEvent::warning("ApplyFailed", "Reconciling", "boom"))
            .await;
        log.publish(&demo, DiagnosticEvent::normal("StateChanged", "Reconciling", "Created"))
            .await;

        assert_eq!(log.events().len(), 3);
        assert_eq!(
            log.reasons(&ObjectKey::new("ns", "demo")),
            vec!["StateChanged", "StateChanged"]
        );

        log.clear();
        assert!(log.events().is_empty());
    }
}
