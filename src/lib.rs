//! Chubao Operator - ChubaoFS on Kubernetes
//!
//! A Kubernetes operator that turns a `ChubaoCluster` resource into a running
//! ChubaoFS cluster (master raft group, metanodes, datanodes) plus its
//! monitoring stack (Consul, Prometheus, Grafana), and reports aggregate
//! health back as status.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Reconciliation Engine                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────────┐   ┌─────────────────────────┐  │
//! │  │    Config    │──▶│     Resource     │──▶│      Apply Engine       │  │
//! │  │   Resolver   │   │   Synthesizer    │   │   (create-or-update)    │  │
//! │  └──────────────┘   └────────┬─────────┘   └────────────┬────────────┘  │
//! │                              │                          │               │
//! │                   ┌──────────┴─────────┐   ┌────────────┴────────────┐  │
//! │                   │   Peer/Address     │   │  Status/Condition       │  │
//! │                   │   Deriver          │   │  Machine                │  │
//! │                   └────────────────────┘   └─────────────────────────┘  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                 Ports                                   │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌─────────────────────┐  │
//! │  │  ResourceStore   │   │  HealthReporter  │   │      EventSink      │  │
//! │  │ (kube / memory)  │   │   (readiness)    │   │ (recorder / memory) │  │
//! │  └──────────────────┘   └──────────────────┘   └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: reconcile loop, apply engine, status machine
//! - [`resolver`]: layered defaulting of the cluster spec
//! - [`resources`]: desired objects per component
//! - [`store`]: resource store adapters
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod config;
pub mod controller;
pub mod crd;
pub mod dashboards;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod resolver;
pub mod resources;
pub mod store;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, Resource};
use std::sync::Arc;
use tracing::{debug, info, warn};

// Re-export commonly used types
pub use config::OperatorConfig;

pub use controller::{error_policy, reconcile, Context, EventLog, KubeEventSink, WorkloadHealthReporter};

pub use crd::{
    ChubaoCluster, ChubaoClusterSpec, ChubaoClusterStatus, ClusterCondition, ClusterState,
    ConditionStatus, ConditionType,
};

pub use domain::{
    Component, EventSink, HealthReporter, ManagedObject, ObjectKey, ObjectKind, ResourceStore,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::ReconcileMetrics;

pub use store::{InMemoryStore, KubeStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Api over one namespace, or over all of them
pub fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Watch ChubaoClusters and the objects they own until a shutdown signal
pub async fn run_controller(client: Client, ctx: Arc<Context>) {
    let namespace = ctx.config.namespace.clone();
    let ns = namespace.as_deref();

    let owned = watcher::Config::default().labels(&format!(
        "{}={}",
        resources::common::LABEL_MANAGED_BY,
        resources::common::MANAGER_NAME
    ));

    info!(
        namespace = ns.unwrap_or("*"),
        concurrency = ctx.config.concurrency,
        "Starting ChubaoCluster controller"
    );

    Controller::new(scoped_api::<ChubaoCluster>(&client, ns), watcher::Config::default())
        .owns(scoped_api::<ConfigMap>(&client, ns), owned.clone())
        .owns(scoped_api::<Service>(&client, ns), owned.clone())
        .owns(scoped_api::<StatefulSet>(&client, ns), owned.clone())
        .owns(scoped_api::<Deployment>(&client, ns), owned.clone())
        .owns(scoped_api::<DaemonSet>(&client, ns), owned)
        .with_config(ControllerConfig::default().concurrency(ctx.config.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((cluster, action)) => debug!(cluster = %cluster, ?action, "Reconciled"),
                Err(e) => warn!(error = %e, "Reconcile failed"),
            }
        })
        .await;

    info!("Controller stopped");
}
