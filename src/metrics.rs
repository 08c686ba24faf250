//! Reconcile metrics
//!
//! Registered on a caller-supplied registry so tests get a fresh one.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

use crate::error::Result;

#[derive(Clone)]
pub struct ReconcileMetrics {
    reconciles: IntCounterVec,
    duration: HistogramVec,
    apply_failures: IntCounterVec,
}

impl std::fmt::Debug for ReconcileMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileMetrics").finish_non_exhaustive()
    }
}

impl ReconcileMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let reconciles = IntCounterVec::new(
            Opts::new("chubao_reconcile_total", "Reconcile passes by result"),
            &["result"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "chubao_reconcile_duration_seconds",
                "Duration of reconcile passes",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["result"],
        )?;
        let apply_failures = IntCounterVec::new(
            Opts::new(
                "chubao_apply_failures_total",
                "Failed applies by component",
            ),
            &["component"],
        )?;

        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(apply_failures.clone()))?;

        Ok(Self {
            reconciles,
            duration,
            apply_failures,
        })
    }

    pub fn record_reconcile(&self, result: &str, elapsed: Duration) {
        self.reconciles.with_label_values(&[result]).inc();
        self.duration
            .with_label_values(&[result])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_apply_failure(&self, component: &str) {
        self.apply_failures.with_label_values(&[component]).inc();
    }

    pub fn reconciles(&self, result: &str) -> u64 {
        self.reconciles.with_label_values(&[result]).get()
    }

    pub fn apply_failures(&self, component: &str) -> u64 {
        self.apply_failures.with_label_values(&[component]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::error::Error;

    #[test]
    fn test_counters() {
        let registry = Registry::new();
        let metrics = ReconcileMetrics::register(&registry).unwrap();

        metrics.record_reconcile("success", Duration::from_millis(20));
        metrics.record_reconcile("error", Duration::from_millis(40));
        metrics.record_reconcile("success", Duration::from_millis(10));
        metrics.record_apply_failure("master");

        assert_eq!(metrics.reconciles("success"), 2);
        assert_eq!(metrics.reconciles("error"), 1);
        assert_eq!(metrics.apply_failures("master"), 1);
        assert_eq!(metrics.apply_failures("grafana"), 0);

        let names: Vec<_> = registry.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"chubao_reconcile_duration_seconds".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        ReconcileMetrics::register(&registry).unwrap();
        assert_matches!(ReconcileMetrics::register(&registry), Err(Error::Metrics(_)));
    }
}
