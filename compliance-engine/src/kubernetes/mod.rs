//! Kubernetes integration
//!
//! Provides:
//! - The `ClusterApi` seam every check and the spawner talk through
//! - Manifest builders for probe workloads, headless services and pull secrets
//! - The kube-rs backed production implementation

pub mod client;
pub mod manifests;

use crate::error::AuditResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use client::{KubeCluster, KubeConnector};
pub use manifests::{HeadlessServiceSpec, ProbeWorkloadSpec, SecretSpec, VolumeClaimSpec};

/// Observed state of a stateful workload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub replicas: i32,
    /// Unset until the controller reports status
    pub ready_replicas: Option<i32>,
}

/// Node summary used by resource and probe checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Raw capacity quantities (`cpu`, `memory`, `ephemeral-storage`, ...)
    pub capacity: BTreeMap<String, String>,
}

/// Operations the engine needs from a cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Probe the API server readiness endpoint
    async fn health_check(&self) -> AuditResult<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> AuditResult<Option<SecretSpec>>;
    async fn create_secret(&self, spec: &SecretSpec) -> AuditResult<()>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> AuditResult<()>;

    async fn create_service(&self, spec: &HeadlessServiceSpec) -> AuditResult<()>;
    async fn delete_service(&self, namespace: &str, name: &str) -> AuditResult<()>;

    async fn create_stateful_set(&self, spec: &ProbeWorkloadSpec) -> AuditResult<()>;
    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> AuditResult<Option<WorkloadStatus>>;
    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> AuditResult<()>;

    /// Names of PVCs matching a label selector
    async fn list_pvcs(&self, namespace: &str, label_selector: &str) -> AuditResult<Vec<String>>;
    async fn delete_pvc(&self, namespace: &str, name: &str) -> AuditResult<()>;

    async fn list_nodes(&self, label_selector: Option<&str>) -> AuditResult<Vec<NodeInfo>>;

    /// Names of pods matching the given selectors
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> AuditResult<Vec<String>>;

    /// Run a shell command in the pod and return its trimmed stdout
    async fn exec(&self, namespace: &str, pod: &str, command: &str) -> AuditResult<String>;

    /// API server `gitVersion`
    async fn server_version(&self) -> AuditResult<String>;
    async fn list_namespaces(&self) -> AuditResult<Vec<String>>;

    /// `spec.hard` of every resource quota in the cluster
    async fn list_resource_quotas(&self) -> AuditResult<Vec<BTreeMap<String, String>>>;

    /// Whether the current identity may perform any verb on any resource
    async fn can_administer(&self) -> AuditResult<bool>;

    /// Calico version from the `default` cluster information object
    async fn calico_version(&self) -> AuditResult<Option<String>>;
}

impl std::fmt::Debug for dyn ClusterApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClusterApi")
    }
}

/// Opens cluster sessions
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self) -> AuditResult<Arc<dyn ClusterApi>>;
}
