//! Shared context for the controller
//!
//! Holds the ports the reconciler talks through, the operator settings, and
//! per-cluster retry state.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use dashmap::DashMap;
use std::time::Duration;

use crate::config::OperatorConfig;
use crate::dashboards::Dashboards;
use crate::domain::{EventSinkRef, HealthReporterRef, ObjectKey, ResourceStoreRef};
use crate::metrics::ReconcileMetrics;

pub struct Context {
    pub store: ResourceStoreRef,
    pub health: HealthReporterRef,
    pub events: EventSinkRef,
    pub config: OperatorConfig,
    /// Grafana content fetched at startup
    pub dashboards: Dashboards,
    pub metrics: Option<ReconcileMetrics>,
    backoffs: DashMap<ObjectKey, ExponentialBackoff>,
}

impl Context {
    pub fn new(
        store: ResourceStoreRef,
        health: HealthReporterRef,
        events: EventSinkRef,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            health,
            events,
            config,
            dashboards: Dashboards::new(),
            metrics: None,
            backoffs: DashMap::new(),
        }
    }

    pub fn with_dashboards(mut self, dashboards: Dashboards) -> Self {
        self.dashboards = dashboards;
        self
    }

    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Delay before retrying a failed cluster. Grows with every consecutive
    /// failure up to `backoff_max` and never gives up.
    pub fn next_backoff(&self, key: &ObjectKey) -> Duration {
        let mut entry = self
            .backoffs
            .entry(key.clone())
            .or_insert_with(|| self.new_backoff());
        entry.next_backoff().unwrap_or(self.config.backoff_max)
    }

    /// Forget the failure streak of a cluster
    pub fn reset_backoff(&self, key: &ObjectKey) {
        self.backoffs.remove(key);
    }

    fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.backoff_initial)
            .with_max_interval(self.config.backoff_max)
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::events::EventLog;
    use crate::controller::health::WorkloadHealthReporter;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    fn context() -> Context {
        let store = Arc::new(InMemoryStore::new());
        Context::new(
            store.clone(),
            Arc::new(WorkloadHealthReporter::new(store)),
            Arc::new(EventLog::new()),
            OperatorConfig {
                backoff_initial: Duration::from_secs(5),
                backoff_max: Duration::from_secs(30),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_backoff_grows_to_ceiling() {
        let ctx = context();
        let key = ObjectKey::new("ns", "demo");

        let delays: Vec<u64> = (0..6).map(|_| ctx.next_backoff(&key).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30, 30]);
    }

    #[test]
    fn test_backoff_is_per_cluster_and_resets() {
        let ctx = context();
        let demo = ObjectKey::new("ns", "demo");
        let other = ObjectKey::new("ns", "other");

        ctx.next_backoff(&demo);
        ctx.next_backoff(&demo);
        assert_eq!(ctx.next_backoff(&other), Duration::from_secs(5));

        ctx.reset_backoff(&demo);
        assert_eq!(ctx.next_backoff(&demo), Duration::from_secs(5));
    }
}
