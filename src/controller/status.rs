//! Status/Condition Machine
//!
//! Pure functions over [`ChubaoClusterStatus`]. The machine holds no state
//! of its own: every pass re-derives the cluster state from the persisted
//! status, the spec generation and the outcome of the latest apply pass.
//!
//! ```text
//! Creating -> Created -> Updating <-> Connecting <-> Connected
//!     any state -> Error -> Connecting
//! ```

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::crd::{
    ChubaoClusterStatus, ChubaoHealth, ClusterCondition, ClusterState, ConditionStatus,
    ConditionType, HealthMessage,
};

/// Condition types that mirror a cluster state
const STATE_PHASES: [ConditionType; 6] = [
    ConditionType::Progressing,
    ConditionType::Ready,
    ConditionType::Updating,
    ConditionType::Connecting,
    ConditionType::Connected,
    ConditionType::Failure,
];

// =============================================================================
// Severity
// =============================================================================

/// Health severity, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

impl Severity {
    /// Unknown severities rank as warning
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "ok" | "health_ok" => Severity::Ok,
            "critical" | "error" | "health_err" => Severity::Critical,
            _ => Severity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most severe of all reported severities; `None` for an empty report
pub fn aggregate(details: &BTreeMap<String, HealthMessage>) -> Option<Severity> {
    details.values().map(|m| Severity::parse(&m.severity)).max()
}

// =============================================================================
// State Transitions
// =============================================================================

/// State persisted before the apply pass
pub fn entry_state(status: Option<&ChubaoClusterStatus>, generation: Option<i64>) -> ClusterState {
    let Some(status) = status else {
        return ClusterState::Creating;
    };
    match status.state {
        None => ClusterState::Creating,
        Some(ClusterState::Creating) => ClusterState::Creating,
        // a spec edit does not clear a failure; recovery still goes through Connecting
        Some(ClusterState::Error) => ClusterState::Error,
        Some(state) => {
            if generation.is_some() && generation != status.observed_generation {
                ClusterState::Updating
            } else {
                state
            }
        }
    }
}

/// State after the apply pass.
///
/// Any failed component forces `Error`. A successful first pass settles on
/// `Created`, recovery from `Error` goes through `Connecting`, and otherwise
/// the cluster is `Connected` only once aggregate health is confirmed ok.
pub fn exit_state(entry: ClusterState, any_failed: bool, health: Option<Severity>) -> ClusterState {
    if any_failed {
        return ClusterState::Error;
    }
    match entry {
        ClusterState::Creating => ClusterState::Created,
        ClusterState::Error => ClusterState::Connecting,
        _ if health == Some(Severity::Ok) => ClusterState::Connected,
        _ => ClusterState::Connecting,
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Upsert a condition by type.
///
/// An unchanged status only moves the heartbeat; a changed status moves
/// both timestamps. Conditions are never removed.
pub fn set_condition(
    conditions: &mut Vec<ClusterCondition>,
    r#type: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) {
    match conditions.iter_mut().find(|c| c.r#type == r#type) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Some(now);
            }
            existing.last_heartbeat_time = Some(now);
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        }
        None => conditions.push(ClusterCondition {
            r#type,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_heartbeat_time: Some(now),
            last_transition_time: Some(now),
        }),
    }
}

/// Record a state, its phase and the matching condition.
///
/// The phase condition of the new state is set True and every other
/// state-phase condition that is currently True is set False.
pub fn record_state(
    status: &mut ChubaoClusterStatus,
    state: ClusterState,
    message: &str,
    now: DateTime<Utc>,
) {
    let phase = state.phase();
    status.state = Some(state);
    status.phase = Some(phase);
    status.message = message.to_string();

    let reason = state.to_string();
    set_condition(
        &mut status.conditions,
        phase,
        ConditionStatus::True,
        &reason,
        message,
        now,
    );

    let stale: Vec<ConditionType> = status
        .conditions
        .iter()
        .filter(|c| c.r#type != phase && c.status == ConditionStatus::True)
        .filter(|c| STATE_PHASES.contains(&c.r#type))
        .map(|c| c.r#type)
        .collect();
    for r#type in stale {
        set_condition(
            &mut status.conditions,
            r#type,
            ConditionStatus::False,
            &format!("Now{}", reason),
            "",
            now,
        );
    }
}

// =============================================================================
// Health
// =============================================================================

/// Fold a health report into the status' health snapshot.
///
/// An empty report confirms nothing and leaves the snapshot as it was. When
/// the aggregate changes, the old aggregate and details are kept as
/// `previous*` and `lastChanged` moves. `lastChecked` moves on every report.
pub fn record_health(
    status: &mut ChubaoClusterStatus,
    details: BTreeMap<String, HealthMessage>,
    now: DateTime<Utc>,
) {
    let Some(severity) = aggregate(&details) else {
        return;
    };
    let health = severity.as_str().to_string();

    match status.chubao.as_mut() {
        None => {
            status.chubao = Some(ChubaoHealth {
                health,
                details,
                last_checked: Some(now),
                last_changed: Some(now),
                previous_health: String::new(),
                previous_details: BTreeMap::new(),
            });
        }
        Some(snapshot) => {
            if snapshot.health != health {
                snapshot.previous_health = std::mem::take(&mut snapshot.health);
                snapshot.previous_details = std::mem::take(&mut snapshot.details);
                snapshot.health = health;
                snapshot.last_changed = Some(now);
            }
            snapshot.details = details;
            snapshot.last_checked = Some(now);
        }
    }
}
