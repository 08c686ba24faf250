//! Operator configuration

use std::time::Duration;

/// Runtime settings of the operator, filled from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch, all namespaces when `None`
    pub namespace: Option<String>,
    /// Clusters reconciled in parallel
    pub concurrency: u16,
    /// Requeue interval of a converged cluster
    pub resync_interval: Duration,
    /// Requeue interval while workloads are still coming up
    pub pending_requeue: Duration,
    /// First retry delay of a failed reconcile
    pub backoff_initial: Duration,
    /// Retry delay ceiling
    pub backoff_max: Duration,
    /// Where to fetch Grafana dashboards from at startup
    pub dashboard_base_url: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: 4,
            resync_interval: Duration::from_secs(300),
            pending_requeue: Duration::from_secs(15),
            backoff_initial: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            dashboard_base_url: None,
        }
    }
}
