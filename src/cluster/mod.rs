//! # Cluster State
//!
//! The boundary between the reconciler and the Kubernetes API.
//!
//! The reconciler only talks to the cluster through [`ClusterState`], so it can
//! be driven against an in-memory fake in tests. [`KubeClusterState`] is the
//! production implementation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use thiserror::Error;

mod kubernetes;

pub use kubernetes::{is_terminating, KubeClusterState};

/// Errors returned by cluster operations
///
/// The variants mirror how the controller reacts, not the HTTP status codes
/// they come from.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// Object (or its namespace) does not exist
    #[error("object not found")]
    NotFound,
    /// An object with the same name already exists
    #[error("object already exists")]
    Conflict,
    /// The controller's service account may not perform the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// API unavailable, namespace terminating, throttled, transport failures
    #[error("transient failure: {0}")]
    Transient(String),
}

impl ClusterError {
    /// Stable label for metrics and structured logs
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ClusterError::NotFound => "not_found",
            ClusterError::Conflict => "conflict",
            ClusterError::PermissionDenied(_) => "permission_denied",
            ClusterError::Transient(_) => "transient",
        }
    }
}

/// Read/write operations the reconciler needs from the cluster
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Names of all active (non-terminating) namespaces
    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError>;

    /// Secrets in every namespace matching a label selector (`key=value`)
    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>, ClusterError>;

    /// Fetch a secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str)
        -> Result<Option<Secret>, ClusterError>;

    /// Create a secret; fails with `Conflict` if the name is taken
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ClusterError>;

    /// Delete a secret; fails with `NotFound` if it does not exist
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}
