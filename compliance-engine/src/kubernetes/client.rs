//! kube-rs backed cluster access
//!
//! Wraps the kube-rs Client and implements `ClusterApi` on top of it.

use super::{
    ClusterApi, ClusterConnector, HeadlessServiceSpec, NodeInfo, ProbeWorkloadSpec, SecretSpec,
    WorkloadStatus,
};
use crate::error::{AuditError, AuditResult};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    Namespace, Node, PersistentVolumeClaim, Pod, ResourceQuota, Secret, Service,
};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::sync::Arc;

const CALICO_GROUP: &str = "crd.projectcalico.org";
const CALICO_VERSION: &str = "v1";
const CALICO_KIND: &str = "ClusterInformation";
const CALICO_PLURAL: &str = "clusterinformations";

/// Cluster session over a kube-rs Client
#[derive(Clone)]
pub struct KubeCluster {
    inner: Client,
}

impl KubeCluster {
    pub fn new(inner: Client) -> Self {
        Self { inner }
    }

    /// Build a client from the local kubeconfig, falling back to the
    /// in-cluster service account
    pub async fn infer() -> AuditResult<Self> {
        let config = Config::infer()
            .await
            .map_err(|e| AuditError::InvalidKubeconfig(e.to_string()))?;

        tracing::debug!(cluster_url = %config.cluster_url, "Loaded kubernetes config");

        let client = Client::try_from(config)
            .map_err(|e| AuditError::InvalidKubeconfig(format!("Failed to create client: {}", e)))?;

        Ok(Self::new(client))
    }
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn health_check(&self) -> AuditResult<()> {
        let request = http::Request::get("/readyz")
            .body(Vec::new())
            .map_err(|e| AuditError::Internal(e.to_string()))?;

        match self.inner.request_text(request).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("Cluster health check failed: {}", e);
                Err(AuditError::HealthCheck(e.to_string()))
            }
        }
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> AuditResult<Option<SecretSpec>> {
        let secrets: Api<Secret> = Api::namespaced(self.inner.clone(), namespace);
        let secret = secrets.get_opt(name).await?;

        Ok(secret.as_ref().map(SecretSpec::from_manifest))
    }

    async fn create_secret(&self, spec: &SecretSpec) -> AuditResult<()> {
        let secrets: Api<Secret> = Api::namespaced(self.inner.clone(), &spec.namespace);
        secrets
            .create(&PostParams::default(), &spec.to_manifest())
            .await?;

        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> AuditResult<()> {
        let secrets: Api<Secret> = Api::namespaced(self.inner.clone(), namespace);
        secrets.delete(name, &DeleteParams::default()).await?;

        Ok(())
    }

    async fn create_service(&self, spec: &HeadlessServiceSpec) -> AuditResult<()> {
        let services: Api<Service> = Api::namespaced(self.inner.clone(), &spec.namespace);
        services
            .create(&PostParams::default(), &spec.to_manifest())
            .await?;

        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> AuditResult<()> {
        let services: Api<Service> = Api::namespaced(self.inner.clone(), namespace);
        services.delete(name, &DeleteParams::default()).await?;

        Ok(())
    }

    async fn create_stateful_set(&self, spec: &ProbeWorkloadSpec) -> AuditResult<()> {
        let stateful_sets: Api<StatefulSet> =
            Api::namespaced(self.inner.clone(), &spec.namespace);
        stateful_sets
            .create(&PostParams::default(), &spec.to_manifest())
            .await?;

        Ok(())
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> AuditResult<Option<WorkloadStatus>> {
        let stateful_sets: Api<StatefulSet> = Api::namespaced(self.inner.clone(), namespace);
        let sts = stateful_sets.get_opt(name).await?;

        Ok(sts.map(statefulset_to_status))
    }

    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> AuditResult<()> {
        let stateful_sets: Api<StatefulSet> = Api::namespaced(self.inner.clone(), namespace);
        stateful_sets.delete(name, &DeleteParams::default()).await?;

        Ok(())
    }

    async fn list_pvcs(&self, namespace: &str, label_selector: &str) -> AuditResult<Vec<String>> {
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(self.inner.clone(), namespace);
        let list = pvcs
            .list(&ListParams::default().labels(label_selector))
            .await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|pvc| pvc.metadata.name)
            .collect())
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> AuditResult<()> {
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(self.inner.clone(), namespace);
        pvcs.delete(name, &DeleteParams::default()).await?;

        Ok(())
    }

    async fn list_nodes(&self, label_selector: Option<&str>) -> AuditResult<Vec<NodeInfo>> {
        let nodes: Api<Node> = Api::all(self.inner.clone());
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = nodes.list(&params).await?;

        Ok(list.items.into_iter().map(node_to_info).collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> AuditResult<Vec<String>> {
        let pods: Api<Pod> = Api::namespaced(self.inner.clone(), namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        if let Some(selector) = field_selector {
            params = params.fields(selector);
        }
        let list = pods.list(&params).await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }

    async fn exec(&self, namespace: &str, pod: &str, command: &str) -> AuditResult<String> {
        use kube::api::AttachParams;
        use tokio::io::AsyncReadExt;

        let pods: Api<Pod> = Api::namespaced(self.inner.clone(), namespace);

        let attach_params = AttachParams {
            container: None,
            tty: false,
            stdin: false,
            stdout: true,
            stderr: true,
            max_stdin_buf_size: Some(1024),
            max_stdout_buf_size: Some(1024 * 1024),
            max_stderr_buf_size: Some(1024 * 1024),
        };

        tracing::debug!(pod, command, "Executing command in pod");

        let mut attached = pods
            .exec(pod, vec!["/bin/sh", "-c", command], &attach_params)
            .await?;

        let mut stdout_reader = attached
            .stdout()
            .ok_or_else(|| AuditError::Exec("No stdout channel".to_string()))?;
        let mut stderr_reader = attached
            .stderr()
            .ok_or_else(|| AuditError::Exec("No stderr channel".to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let (out, err) = tokio::join!(
            stdout_reader.read_to_end(&mut stdout),
            stderr_reader.read_to_end(&mut stderr)
        );
        out.map_err(|e| AuditError::Exec(e.to_string()))?;
        err.map_err(|e| AuditError::Exec(e.to_string()))?;

        attached
            .join()
            .await
            .map_err(|e| AuditError::Exec(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&stderr);
        if !stderr.trim().is_empty() {
            tracing::debug!(pod, "Command stderr: {}", stderr.trim());
        }

        let output = String::from_utf8_lossy(&stdout).trim().to_string();
        tracing::debug!(pod, "Command output: {}", output);
        Ok(output)
    }

    async fn server_version(&self) -> AuditResult<String> {
        let version = self.inner.apiserver_version().await?;
        Ok(version.git_version)
    }

    async fn list_namespaces(&self) -> AuditResult<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.inner.clone());
        let list = namespaces.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_resource_quotas(&self) -> AuditResult<Vec<BTreeMap<String, String>>> {
        let quotas: Api<ResourceQuota> = Api::all(self.inner.clone());
        let list = quotas.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .map(|quota| {
                quota
                    .spec
                    .and_then(|spec| spec.hard)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, v.0))
                    .collect()
            })
            .collect())
    }

    async fn can_administer(&self) -> AuditResult<bool> {
        use k8s_openapi::api::authorization::v1::{
            ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
        };

        let reviews: Api<SelfSubjectAccessReview> = Api::all(self.inner.clone());
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    resource: Some("*".to_string()),
                    verb: Some("*".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let created = reviews.create(&PostParams::default(), &review).await?;
        Ok(created.status.map(|s| s.allowed).unwrap_or(false))
    }

    async fn calico_version(&self) -> AuditResult<Option<String>> {
        use kube::api::{ApiResource, DynamicObject, GroupVersionKind};

        let gvk = GroupVersionKind::gvk(CALICO_GROUP, CALICO_VERSION, CALICO_KIND);
        let resource = ApiResource::from_gvk_with_plural(&gvk, CALICO_PLURAL);
        let infos: Api<DynamicObject> = Api::all_with(self.inner.clone(), &resource);

        let info = match infos.list(&ListParams::default()).await {
            Ok(list) => list.items.into_iter().next(),
            // CRD is not installed at all
            Err(kube::Error::Api(response)) if response.code == 404 => None,
            Err(e) => return Err(e.into()),
        };

        Ok(info.and_then(|obj| {
            obj.data
                .get("spec")
                .and_then(|spec| spec.get("calicoVersion"))
                .and_then(|v| v.as_str())
                .map(String::from)
        }))
    }
}

fn statefulset_to_status(sts: StatefulSet) -> WorkloadStatus {
    let metadata = sts.metadata;
    let spec = sts.spec.unwrap_or_default();
    let status = sts.status.unwrap_or_default();

    WorkloadStatus {
        name: metadata.name.unwrap_or_default(),
        namespace: metadata.namespace.unwrap_or_default(),
        labels: metadata.labels.unwrap_or_default(),
        replicas: spec.replicas.unwrap_or(1),
        ready_replicas: status.ready_replicas,
    }
}

fn node_to_info(node: Node) -> NodeInfo {
    let capacity = node
        .status
        .and_then(|s| s.capacity)
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect();

    NodeInfo {
        name: node.metadata.name.unwrap_or_default(),
        labels: node.metadata.labels.unwrap_or_default(),
        capacity,
    }
}

/// Connects to the cluster described by the ambient kube configuration
#[derive(Debug, Default, Clone)]
pub struct KubeConnector;

impl KubeConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self) -> AuditResult<Arc<dyn ClusterApi>> {
        let cluster = KubeCluster::infer().await?;
        cluster.health_check().await?;
        tracing::debug!("Connected to kubernetes cluster");
        Ok(Arc::new(cluster))
    }
}
