//! Engine error types
//!
//! Errors raised while talking to the cluster, provisioning section
//! resources or waiting for them to become ready.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the engine and its cluster integration
#[derive(Debug, Error)]
pub enum AuditError {
    /// Error from kube-rs client
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig or in-cluster configuration could not be loaded
    #[error("Failed to load kubernetes config: {0}")]
    InvalidKubeconfig(String),

    /// API server did not answer its readiness probe
    #[error("Kubernetes health check failed: {0}")]
    HealthCheck(String),

    /// Registry secret is absent and no credentials were configured
    #[error("Registry credentials not found for secret {0}")]
    MissingCredentials(String),

    /// Poll deadline expired
    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// Resource setup failed for a reason other than an API error
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// Exec session error
    #[error("Exec error: {0}")]
    Exec(String),

    /// Check selector could not be parsed
    #[error("Check \"{0}\" is invalid")]
    InvalidSelector(String),

    /// A check asked for a resource its section never provisioned
    #[error("Dependency not provisioned: {0}")]
    NotProvisioned(String),

    /// Internal system error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuditError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias for engine operations
pub type AuditResult<T> = std::result::Result<T, AuditError>;
