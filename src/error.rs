//! Error types for the Chubao Operator
//!
//! Provides structured error types for the reconciler, the resource store
//! adapters and the ambient services (metrics, dashboard provisioning).

use std::time::Duration;
use thiserror::Error;

use crate::domain::object::ObjectKind;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // =========================================================================
    // Kubernetes / Store Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource store error: {0}")]
    Store(#[from] StoreError),

    #[error("Reconcile of {cluster} failed for {}: {}", .failures.len(), summarize(.failures))]
    ComponentsFailed {
        cluster: String,
        failures: Vec<ComponentFailure>,
    },

    // =========================================================================
    // Monitoring Content Errors
    // =========================================================================
    #[error("Dashboard fetch error: {0}")]
    DashboardFetch(#[from] reqwest::Error),

    #[error("Dashboard {url} returned HTTP {status}")]
    DashboardStatus { url: String, status: u16 },

    #[error("Metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

/// Failure of the resource store behind the reconciler.
///
/// Mirrors the outcomes the API server reports for create, update and get.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("update conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Conflicts, timeouts and unavailability resolve on their own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_) | StoreError::Timeout(_) | StoreError::Unavailable(_)
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => {
                let detail = resp.message.clone();
                match resp.code {
                    409 if resp.reason == "AlreadyExists" => StoreError::AlreadyExists(detail),
                    409 => StoreError::Conflict(detail),
                    404 => StoreError::NotFound(detail),
                    401 | 403 => StoreError::Forbidden(detail),
                    400 | 422 => StoreError::Invalid(detail),
                    408 | 504 => StoreError::Timeout(detail),
                    _ => StoreError::Unavailable(format!("{} ({})", detail, resp.code)),
                }
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Which half of the create-or-update protocol failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOperation {
    Create,
    Update,
}

impl std::fmt::Display for ApplyOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyOperation::Create => write!(f, "create"),
            ApplyOperation::Update => write!(f, "update"),
        }
    }
}

/// A failed apply, attributed to the object and operation that failed
#[derive(Error, Debug, Clone)]
#[error("failed to {operation} {kind} {namespace}/{name}: {source}")]
pub struct ApplyError {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
    pub operation: ApplyOperation,
    #[source]
    pub source: StoreError,
}

impl ApplyError {
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// Per-component failure carried out of a reconcile pass
#[derive(Debug, Clone)]
pub struct ComponentFailure {
    pub component: String,
    pub error: ApplyError,
}

fn summarize(failures: &[ComponentFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.component, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Nothing changes until the user edits the spec
            Error::Configuration(_) => ErrorAction::NoRequeue,

            // Conflicts settle quickly once the competing writer is done
            Error::Store(StoreError::Conflict(_)) => {
                ErrorAction::RequeueAfter(Duration::from_secs(1))
            }

            // Everything else, including forbidden and invalid objects,
            // is retried forever with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(_) | Error::DashboardFetch(_) => true,
            Error::Store(e) => e.is_retryable(),
            Error::ComponentsFailed { failures, .. } => {
                failures.iter().all(|f| f.error.is_retryable())
            }
            _ => false,
        }
    }

    /// Check if this error indicates the object no longer exists
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            Error::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
