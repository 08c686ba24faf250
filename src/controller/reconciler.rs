//! Reconciliation loop for ChubaoCluster
//!
//! One pass: load → validate → resolve → record entry state → synthesize →
//! apply every component → collect health → record exit state. A failing
//! component never stops the others; the pass fails afterwards with every
//! failure attributed to its component and object.

use chrono::Utc;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::apply::apply_component;
use super::context::Context;
use super::status::{aggregate, entry_state, exit_state, record_health, record_state, Severity};
use crate::crd::{ChubaoCluster, ClusterState, ClusterVersion, HealthMessage};
use crate::domain::{DiagnosticEvent, ObjectKey};
use crate::error::{ComponentFailure, Error, ErrorAction, Result};
use crate::resolver::{self, ResolvedCluster};
use crate::resources::{synthesize, ClusterIdentity};

const ACTION: &str = "Reconciling";

/// Entry point for the kube-runtime controller
pub async fn reconcile(cluster: Arc<ChubaoCluster>, ctx: Arc<Context>) -> Result<Action> {
    let key = ObjectKey::of(cluster.as_ref());
    let start = Instant::now();

    let result = reconcile_cluster(&key, &ctx).await;

    if let Some(metrics) = &ctx.metrics {
        let outcome = if result.is_ok() { "success" } else { "error" };
        metrics.record_reconcile(outcome, start.elapsed());
    }
    if result.is_ok() {
        ctx.reset_backoff(&key);
    }
    result
}

/// Decide when a failed cluster is retried
pub fn error_policy(cluster: Arc<ChubaoCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ObjectKey::of(cluster.as_ref());

    if error.is_not_found() {
        debug!(cluster = %key, "Cluster gone, dropping");
        return Action::await_change();
    }

    match error.action() {
        ErrorAction::NoRequeue => {
            error!(cluster = %key, error = %error, "Reconcile failed, waiting for a spec change");
            Action::await_change()
        }
        ErrorAction::RequeueAfter(delay) => {
            warn!(cluster = %key, error = %error, ?delay, "Reconcile failed, retrying");
            Action::requeue(delay)
        }
        ErrorAction::RequeueWithBackoff => {
            let delay = ctx.next_backoff(&key);
            warn!(cluster = %key, error = %error, ?delay, "Reconcile failed, backing off");
            Action::requeue(delay)
        }
    }
}

/// One full pass over a cluster, loaded fresh from the store
#[instrument(skip_all, fields(cluster = %key))]
pub async fn reconcile_cluster(key: &ObjectKey, ctx: &Context) -> Result<Action> {
    let Some(cluster) = ctx.store.get_cluster(key).await? else {
        debug!("Cluster not found, nothing to do");
        ctx.reset_backoff(key);
        return Ok(Action::await_change());
    };

    let generation = cluster.metadata.generation;
    let mut status = cluster.status.clone().unwrap_or_default();
    let prior = status.state;

    if let Err(e) = resolver::validate(&cluster.spec) {
        warn!(error = %e, "Invalid cluster spec");
        record_state(&mut status, ClusterState::Error, &e.to_string(), Utc::now());
        status.observed_generation = generation;
        ctx.store.update_cluster_status(key, &status).await?;
        ctx.events
            .publish(&cluster, DiagnosticEvent::warning("InvalidSpec", ACTION, e.to_string()))
            .await;
        return Err(e);
    }

    let id = ClusterIdentity::of(&cluster)?;
    let resolved = ResolvedCluster::resolve(&cluster.spec);

    // Entry state goes out before any object is touched
    let entry = entry_state(cluster.status.as_ref(), generation);
    if prior != Some(entry) {
        let message = entry_message(entry, generation);
        info!(state = %entry, "{}", message);
        record_state(&mut status, entry, &message, Utc::now());
        ctx.store.update_cluster_status(key, &status).await?;
        publish_state(ctx, &cluster, entry, &message).await;
    }

    let desired = synthesize(&resolved, &id, &ctx.dashboards)?;

    let mut failures: Vec<ComponentFailure> = Vec::new();
    for component in &desired {
        match apply_component(ctx.store.as_ref(), component).await {
            Ok(outcomes) => debug!(component = %component.component, ?outcomes, "Applied"),
            Err(failure) => {
                warn!(
                    component = %failure.component,
                    error = %failure.error,
                    "Apply failed"
                );
                if let Some(metrics) = &ctx.metrics {
                    metrics.record_apply_failure(&failure.component);
                }
                ctx.events
                    .publish(
                        &cluster,
                        DiagnosticEvent::warning("ApplyFailed", ACTION, failure.error.to_string()),
                    )
                    .await;
                failures.push(failure);
            }
        }
    }

    let workloads: Vec<_> = desired.iter().map(|d| d.workload_ref()).collect();
    let details = ctx.health.report(&cluster, &workloads).await;
    let health = aggregate(&details);

    let exit = exit_state(entry, !failures.is_empty(), health);
    let message = exit_message(exit, &failures, &details);
    let now = Utc::now();
    record_health(&mut status, details, now);
    record_state(&mut status, exit, &message, now);
    status.version = Some(ClusterVersion::from_image(&resolved.common.server_image));
    status.observed_generation = generation;
    ctx.store.update_cluster_status(key, &status).await?;

    if exit != entry {
        info!(from = %entry, to = %exit, "{}", message);
        publish_state(ctx, &cluster, exit, &message).await;
    }

    if !failures.is_empty() {
        return Err(Error::ComponentsFailed {
            cluster: key.to_string(),
            failures,
        });
    }

    Ok(requeue_for(exit, ctx))
}

/// Converged clusters wait for the resync tick; the rest are polled until
/// their workloads come up
fn requeue_for(state: ClusterState, ctx: &Context) -> Action {
    if state == ClusterState::Connected {
        Action::requeue(ctx.config.resync_interval)
    } else {
        Action::requeue(ctx.config.pending_requeue)
    }
}

async fn publish_state(ctx: &Context, cluster: &ChubaoCluster, state: ClusterState, message: &str) {
    let event = if state == ClusterState::Error {
        DiagnosticEvent::warning("StateChanged", ACTION, format!("{}: {}", state, message))
    } else {
        DiagnosticEvent::normal("StateChanged", ACTION, format!("{}: {}", state, message))
    };
    ctx.events.publish(cluster, event).await;
}

fn entry_message(state: ClusterState, generation: Option<i64>) -> String {
    match state {
        ClusterState::Creating => "Creating ChubaoFS cluster".to_string(),
        ClusterState::Updating => format!("Applying spec generation {}", generation.unwrap_or(0)),
        other => other.to_string(),
    }
}

fn exit_message(
    state: ClusterState,
    failures: &[ComponentFailure],
    details: &BTreeMap<String, HealthMessage>,
) -> String {
    match state {
        ClusterState::Error => failures
            .iter()
            .map(|f| format!("{}: {}", f.component, f.error))
            .collect::<Vec<_>>()
            .join("; "),
        ClusterState::Created => "All components created".to_string(),
        ClusterState::Connected => "All components healthy".to_string(),
        _ => {
            let pending: Vec<String> = details
                .iter()
                .filter(|(_, m)| Severity::parse(&m.severity) != Severity::Ok)
                .map(|(component, m)| format!("{} ({})", component, m.severity))
                .collect();
            if pending.is_empty() {
                "Waiting for health reports".to_string()
            } else {
                format!("Waiting for {}", pending.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::controller::events::EventLog;
    use crate::controller::health::WorkloadHealthReporter;
    use crate::crd::{ChubaoClusterStatus, ConditionStatus, ConditionType};
    use crate::domain::{HealthReporter, ObjectKind, WorkloadRef};
    use crate::error::StoreError;
    use crate::metrics::ReconcileMetrics;
    use crate::resources::tests::test_cluster;
    use crate::store::InMemoryStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Harness {
        store: Arc<InMemoryStore>,
        events: Arc<EventLog>,
        ctx: Arc<Context>,
        key: ObjectKey,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let health = Arc::new(WorkloadHealthReporter::new(store.clone()));
            Self::with_health(store, health)
        }

        fn with_health(store: Arc<InMemoryStore>, health: Arc<dyn HealthReporter>) -> Self {
            store.insert_cluster(test_cluster("ns", "demo"));
            let events = Arc::new(EventLog::new());
            let metrics = ReconcileMetrics::register(&prometheus::Registry::new()).unwrap();
            let ctx = Context::new(store.clone(), health, events.clone(), OperatorConfig::default())
                .with_metrics(metrics);
            Self {
                store,
                events,
                ctx: Arc::new(ctx),
                key: ObjectKey::new("ns", "demo"),
            }
        }

        async fn reconcile(&self) -> Result<Action> {
            reconcile(Arc::new(self.cluster()), self.ctx.clone()).await
        }

        fn cluster(&self) -> ChubaoCluster {
            self.store.cluster(&self.key).unwrap()
        }

        fn status(&self) -> ChubaoClusterStatus {
            self.cluster().status.unwrap()
        }
    }

    /// Health reporter that replays a fixed script of reports
    struct ScriptedHealth {
        reports: Mutex<VecDeque<BTreeMap<String, HealthMessage>>>,
    }

    impl ScriptedHealth {
        fn new(severities: &[&str]) -> Self {
            let reports = severities
                .iter()
                .map(|s| BTreeMap::from([("master".to_string(), HealthMessage::new(*s, *s))]))
                .collect();
            Self {
                reports: Mutex::new(reports),
            }
        }
    }

    #[async_trait]
    impl HealthReporter for ScriptedHealth {
        async fn report(
            &self,
            _cluster: &ChubaoCluster,
            _workloads: &[WorkloadRef],
        ) -> BTreeMap<String, HealthMessage> {
            self.reports.lock().pop_front().unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_first_pass_creates_everything() {
        let h = Harness::new();
        let action = h.reconcile().await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(15)));

        // six components, three objects each
        assert_eq!(h.store.object_count(), 18);

        let status = h.status();
        assert_eq!(status.state, Some(ClusterState::Created));
        assert_eq!(status.phase, Some(ConditionType::Ready));
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.version.as_ref().unwrap().image, "chubaofs/cfs-server:0.0.1");

        let progressing = status.condition(ConditionType::Progressing).unwrap();
        assert_eq!(progressing.status, ConditionStatus::False);

        assert_eq!(
            h.events.reasons(&h.key),
            vec!["StateChanged", "StateChanged"]
        );
    }

    #[tokio::test]
    async fn test_repeated_passes_are_idempotent() {
        let h = Harness::new();
        h.reconcile().await.unwrap();
        let creates = h.store.create_count();
        let key = ObjectKey::new("ns", "demo-master");
        let generation = h.store.generation(ObjectKind::StatefulSet, &key);

        h.reconcile().await.unwrap();
        h.reconcile().await.unwrap();

        assert_eq!(h.store.create_count(), creates);
        assert_eq!(h.store.update_count(), 36);
        assert_eq!(h.store.object_count(), 18);
        assert_eq!(h.store.generation(ObjectKind::StatefulSet, &key), generation);
        assert_eq!(h.status().state, Some(ClusterState::Connecting));
    }

    #[tokio::test]
    async fn test_ready_workloads_connect() {
        let h = Harness::new();
        h.reconcile().await.unwrap();
        h.store.mark_all_ready();

        let action = h.reconcile().await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));

        let status = h.status();
        assert_eq!(status.state, Some(ClusterState::Connected));
        assert_eq!(status.chubao.unwrap().health, "ok");
        assert!(status.message.contains("healthy"));
    }

    #[tokio::test]
    async fn test_failing_component_does_not_block_the_others() {
        let h = Harness::new();
        h.store.fail_on(
            ObjectKind::StatefulSet,
            ObjectKey::new("ns", "demo-master"),
            StoreError::Unavailable("connection reset".into()),
        );

        let err = h.reconcile().await.unwrap_err();
        assert_matches!(&err, Error::ComponentsFailed { failures, .. } if failures.len() == 1);
        assert!(err.is_transient());

        // everything except the master workload went through
        assert_eq!(h.store.object_count(), 17);
        let status = h.status();
        assert_eq!(status.state, Some(ClusterState::Error));
        assert!(status.message.contains("demo-master"));
        assert!(h.events.reasons(&h.key).contains(&"ApplyFailed".to_string()));

        let action = error_policy(Arc::new(h.cluster()), &err, h.ctx.clone());
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        let action = error_policy(Arc::new(h.cluster()), &err, h.ctx.clone());
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));

        let metrics = h.ctx.metrics.as_ref().unwrap();
        assert_eq!(metrics.apply_failures("master"), 1);
        assert_eq!(metrics.reconciles("error"), 1);
    }

    #[tokio::test]
    async fn test_recovery_goes_through_connecting() {
        let h = Harness::new();
        h.store.fail_on(
            ObjectKind::Service,
            ObjectKey::new("ns", "demo-grafana"),
            StoreError::Timeout("slow".into()),
        );
        h.reconcile().await.unwrap_err();
        let err_for_backoff = Error::Store(StoreError::Timeout("slow".into()));
        error_policy(Arc::new(h.cluster()), &err_for_backoff, h.ctx.clone());

        h.store.clear_faults();
        h.store.mark_all_ready();
        h.reconcile().await.unwrap();
        assert_eq!(h.status().state, Some(ClusterState::Connecting));
        assert_eq!(h.ctx.next_backoff(&h.key), Duration::from_secs(5));

        h.store.mark_all_ready();
        h.reconcile().await.unwrap();
        assert_eq!(h.status().state, Some(ClusterState::Connected));

        // the failure is still on record, just no longer active
        let failure = h.status().condition(ConditionType::Failure).cloned().unwrap();
        assert_eq!(failure.status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn test_invalid_spec_is_terminal() {
        let h = Harness::new();
        h.store.update_cluster_spec(&h.key, |spec| spec.master.replicas = -1);

        let err = h.reconcile().await.unwrap_err();
        assert_matches!(err, Error::Configuration(_));
        assert_eq!(h.store.object_count(), 0);
        assert_eq!(h.status().state, Some(ClusterState::Error));
        assert_eq!(
            error_policy(Arc::new(h.cluster()), &err, h.ctx.clone()),
            Action::await_change()
        );
    }

    #[tokio::test]
    async fn test_spec_change_passes_through_updating() {
        let h = Harness::new();
        h.reconcile().await.unwrap();
        h.store.mark_all_ready();
        h.reconcile().await.unwrap();
        assert_eq!(h.status().state, Some(ClusterState::Connected));
        h.events.clear();

        h.store
            .update_cluster_spec(&h.key, |spec| spec.master.log_level = "debug".to_string());
        h.reconcile().await.unwrap();

        let status = h.status();
        assert_eq!(status.observed_generation, Some(2));
        let updating = status.condition(ConditionType::Updating).unwrap();
        assert_eq!(updating.status, ConditionStatus::False);

        let events = h.events.events();
        assert!(events[0].1.message.starts_with("Updating"));
    }

    #[tokio::test]
    async fn test_spec_edit_after_failure_recovers_through_connecting() {
        let h = Harness::new();
        h.reconcile().await.unwrap();
        h.store.mark_all_ready();
        h.reconcile().await.unwrap();

        let master = ObjectKey::new("ns", "demo-master");
        h.store.fail_on(
            ObjectKind::StatefulSet,
            master,
            StoreError::Unavailable("connection reset".into()),
        );
        h.reconcile().await.unwrap_err();
        assert_eq!(h.status().state, Some(ClusterState::Error));
        h.events.clear();

        h.store.clear_faults();
        h.store
            .update_cluster_spec(&h.key, |spec| spec.master.log_level = "debug".to_string());
        h.store.mark_all_ready();
        h.reconcile().await.unwrap();

        let status = h.status();
        assert_eq!(status.state, Some(ClusterState::Connecting));
        assert_eq!(status.observed_generation, Some(2));

        let messages: Vec<String> = h.events.events().into_iter().map(|(_, e)| e.message).collect();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Connecting"));

        h.store.mark_all_ready();
        h.reconcile().await.unwrap();
        assert_eq!(h.status().state, Some(ClusterState::Connected));
    }

    #[tokio::test]
    async fn test_health_flapping_is_visible() {
        let store = Arc::new(InMemoryStore::new());
        let health = Arc::new(ScriptedHealth::new(&["ok", "ok", "critical"]));
        let h = Harness::with_health(store, health);

        h.reconcile().await.unwrap();
        h.reconcile().await.unwrap();
        assert_eq!(h.status().state, Some(ClusterState::Connected));

        h.reconcile().await.unwrap();
        let status = h.status();
        assert_eq!(status.state, Some(ClusterState::Connecting));
        let snapshot = status.chubao.unwrap();
        assert_eq!(snapshot.health, "critical");
        assert_eq!(snapshot.previous_health, "ok");
        assert_eq!(snapshot.previous_details["master"].severity, "ok");
    }

    #[tokio::test]
    async fn test_deleted_cluster_is_dropped() {
        let h = Harness::new();
        let cluster = h.cluster();
        h.store.remove_cluster(&h.key);

        let action = reconcile(Arc::new(cluster), h.ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(h.store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_status_write_failure_is_retried() {
        let h = Harness::new();
        h.store
            .fail_status_updates(StoreError::Unavailable("etcd leader election".into()));

        let err = h.reconcile().await.unwrap_err();
        assert_matches!(err, Error::Store(StoreError::Unavailable(_)));
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);
    }
}
