//! Ephemeral cluster object lifecycle
//!
//! Every object the spawner creates is recorded as a lease. `release()`
//! tears the leases down in reverse creation order. Objects found in the
//! cluster rather than created are never leased and never deleted.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{AuditError, AuditResult};
use crate::kubernetes::{ClusterApi, HeadlessServiceSpec, ProbeWorkloadSpec, SecretSpec};

/// An object created by the spawner that must be deleted again
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lease {
    Secret { namespace: String, name: String },
    Service { namespace: String, name: String },
    StatefulSet { namespace: String, name: String },
}

/// Creates ephemeral cluster objects and guarantees their teardown
pub struct Spawner {
    cluster: Arc<dyn ClusterApi>,
    leases: Vec<Lease>,
}

impl Spawner {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            leases: Vec::new(),
        }
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }

    /// Number of objects awaiting teardown
    pub fn pending(&self) -> usize {
        self.leases.len()
    }

    /// Find the named secret, creating an image pull secret from
    /// `docker_config` when absent.
    ///
    /// A secret found in the cluster is left alone on release. An absent
    /// secret without data is an error.
    pub async fn secret(
        &mut self,
        namespace: &str,
        name: &str,
        docker_config: Option<&str>,
    ) -> AuditResult<SecretSpec> {
        if let Some(existing) = self.cluster.get_secret(namespace, name).await? {
            tracing::debug!(namespace, name, "Using existing secret");
            return Ok(existing);
        }

        let Some(config_json) = docker_config else {
            return Err(AuditError::MissingCredentials(name.to_string()));
        };

        tracing::debug!(namespace, name, "Secret not found. Creating...");
        let spec = SecretSpec::docker_config(name, namespace, config_json);
        self.cluster.create_secret(&spec).await?;
        self.leases.push(Lease::Secret {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        Ok(spec)
    }

    /// Create a headless service, deleted on release
    pub async fn service(&mut self, spec: &HeadlessServiceSpec) -> AuditResult<()> {
        tracing::debug!(name = %spec.name, "Creating Service");
        self.cluster.create_service(spec).await?;
        self.leases.push(Lease::Service {
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
        });
        Ok(())
    }

    /// Create a probe workload; release deletes it and its volume claims
    pub async fn stateful_set(&mut self, spec: &ProbeWorkloadSpec) -> AuditResult<()> {
        tracing::debug!(name = %spec.name, replicas = spec.replicas, "Creating StatefulSet");
        self.cluster.create_stateful_set(spec).await?;
        self.leases.push(Lease::StatefulSet {
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
        });
        Ok(())
    }

    /// Tear down every leased object, newest first.
    ///
    /// Failures are logged and do not stop the remaining teardown.
    pub async fn release(&mut self) {
        while let Some(lease) = self.leases.pop() {
            if let Err(e) = self.teardown(&lease).await {
                tracing::error!(?lease, "Failed to clean up resource: {}", e);
            }
        }
    }

    async fn teardown(&self, lease: &Lease) -> AuditResult<()> {
        match lease {
            Lease::Secret { namespace, name } => {
                tracing::debug!(%namespace, %name, "Deleting Secret");
                self.cluster.delete_secret(namespace, name).await
            }
            Lease::Service { namespace, name } => {
                tracing::debug!(%namespace, %name, "Deleting Service");
                self.cluster.delete_service(namespace, name).await
            }
            Lease::StatefulSet { namespace, name } => {
                tracing::debug!(%namespace, %name, "Deleting StatefulSet");
                self.cluster.delete_stateful_set(namespace, name).await?;

                let selector = format!("app={}", name);
                for pvc in self.cluster.list_pvcs(namespace, &selector).await? {
                    tracing::debug!(%namespace, %pvc, "Deleting PVC");
                    if let Err(e) = self.cluster.delete_pvc(namespace, &pvc).await {
                        tracing::error!(%namespace, %pvc, "Failed to delete PVC: {}", e);
                    }
                }
                Ok(())
            }
        }
    }

    /// Run `body` with a fresh spawner and release it afterwards, whatever
    /// the body returned. A panic in `body` is resumed after the release.
    pub async fn scoped<T, F>(cluster: Arc<dyn ClusterApi>, body: F) -> T
    where
        F: for<'a> FnOnce(&'a mut Spawner) -> BoxFuture<'a, T>,
    {
        let mut spawner = Spawner::new(cluster);
        let result = AssertUnwindSafe(body(&mut spawner)).catch_unwind().await;
        spawner.release().await;
        match result {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for Spawner {
    fn drop(&mut self) {
        if !self.leases.is_empty() {
            tracing::warn!(
                leases = self.leases.len(),
                "Spawner dropped without releasing its resources: {:?}",
                self.leases
            );
        }
    }
}

impl std::fmt::Debug for Spawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawner")
            .field("leases", &self.leases)
            .finish_non_exhaustive()
    }
}
