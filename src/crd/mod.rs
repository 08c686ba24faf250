//! Custom Resource Definitions for the Chubao Operator
//!
//! This module contains the CRD types:
//! - ChubaoCluster: one ChubaoFS deployment and its reported status

pub mod chubao_cluster;

pub use chubao_cluster::*;

// Re-export common types for convenience
pub use chrono::{DateTime, Utc};
pub use std::collections::BTreeMap;
