//! ChubaoCluster controller
//!
//! - [`reconciler`]: the reconcile pass and error policy
//! - [`apply`]: create-or-update of desired objects
//! - [`status`]: state and condition bookkeeping
//! - [`health`]: workload readiness as component health
//! - [`events`]: diagnostic event sinks
//! - [`context`]: state shared by every reconcile

pub mod apply;
pub mod context;
pub mod events;
pub mod health;
pub mod reconciler;
pub mod status;

pub use apply::{apply, apply_component, Applied};
pub use context::Context;
pub use events::{EventLog, KubeEventSink};
pub use health::WorkloadHealthReporter;
pub use reconciler::{error_policy, reconcile, reconcile_cluster};
pub use status::Severity;
