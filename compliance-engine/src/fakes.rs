//! In-memory fakes for the cluster traits (testing only)
//!
//! `MemoryCluster` keeps secrets, services, stateful workloads, their pods
//! and volume claims in plain maps and journals every mutating call, so
//! tests can assert creation and teardown order. `MemoryConnector` hands out
//! the same cluster on every connect and counts the sessions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{AuditError, AuditResult};
use crate::kubernetes::{
    ClusterApi, ClusterConnector, HeadlessServiceSpec, NodeInfo, ProbeWorkloadSpec, SecretSpec,
    WorkloadStatus,
};

/// How quickly spawned workloads report their pods as ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    #[default]
    Immediate,
    /// Ready once the workload has been read this many times
    AfterPolls(u32),
    Never,
}

#[derive(Debug)]
struct WorkloadState {
    spec: ProbeWorkloadSpec,
    polls: u32,
}

#[derive(Debug, Clone)]
struct PodState {
    namespace: String,
    labels: BTreeMap<String, String>,
    node: String,
}

#[derive(Debug, Clone)]
struct ExecResponse {
    pod: Option<String>,
    pattern: String,
    output: String,
}

#[derive(Debug)]
struct ClusterState {
    secrets: BTreeMap<(String, String), SecretSpec>,
    services: BTreeSet<(String, String)>,
    stateful_sets: BTreeMap<(String, String), WorkloadState>,
    pods: BTreeMap<String, PodState>,
    pvcs: BTreeMap<(String, String), BTreeMap<String, String>>,
    nodes: Vec<NodeInfo>,
    namespaces: Vec<String>,
    quotas: Vec<BTreeMap<String, String>>,
    exec_responses: Vec<ExecResponse>,
    version: String,
    admin: bool,
    calico: Option<String>,
    readiness: Readiness,
    failures: BTreeSet<String>,
    panics: BTreeSet<String>,
    journal: Vec<String>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            secrets: BTreeMap::new(),
            services: BTreeSet::new(),
            stateful_sets: BTreeMap::new(),
            pods: BTreeMap::new(),
            pvcs: BTreeMap::new(),
            nodes: Vec::new(),
            namespaces: vec!["default".to_string(), "kube-system".to_string()],
            quotas: Vec::new(),
            exec_responses: Vec::new(),
            version: "v1.23.4".to_string(),
            admin: true,
            calico: Some("v3.24.1".to_string()),
            readiness: Readiness::Immediate,
            failures: BTreeSet::new(),
            panics: BTreeSet::new(),
            journal: Vec::new(),
        }
    }
}

impl ClusterState {
    fn check(&self, op: &str) -> AuditResult<()> {
        if self.panics.contains(op) {
            panic!("{} panicked", op);
        }
        if self.failures.contains(op) {
            return Err(AuditError::Internal(format!("{} failed", op)));
        }
        Ok(())
    }

    fn record(&mut self, op: &str, namespace: &str, name: &str) {
        self.journal.push(format!("{} {}/{}", op, namespace, name));
    }
}

/// In-memory cluster
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a node carrying the given labels and capacity
    pub fn add_node(&self, name: &str, labels: &[(&str, &str)], capacity: &[(&str, &str)]) {
        let node = NodeInfo {
            name: name.to_string(),
            labels: to_map(labels),
            capacity: to_map(capacity),
        };
        self.state().nodes.push(node);
    }

    /// Add a secret that exists before the audit starts
    pub fn add_secret(&self, namespace: &str, name: &str) {
        let spec = SecretSpec {
            name: name.to_string(),
            namespace: namespace.to_string(),
            secret_type: "Opaque".to_string(),
            data: BTreeMap::new(),
        };
        self.state()
            .secrets
            .insert((namespace.to_string(), name.to_string()), spec);
    }

    pub fn add_namespace(&self, name: &str) {
        self.state().namespaces.push(name.to_string());
    }

    pub fn add_resource_quota(&self, hard: &[(&str, &str)]) {
        self.state().quotas.push(to_map(hard));
    }

    /// Answer commands containing `pattern` with `output` on every pod
    pub fn respond_to(&self, pattern: &str, output: &str) {
        self.state().exec_responses.push(ExecResponse {
            pod: None,
            pattern: pattern.to_string(),
            output: output.to_string(),
        });
    }

    /// Answer commands containing `pattern` with `output` on a single pod
    pub fn respond_to_pod(&self, pod: &str, pattern: &str, output: &str) {
        self.state().exec_responses.push(ExecResponse {
            pod: Some(pod.to_string()),
            pattern: pattern.to_string(),
            output: output.to_string(),
        });
    }

    pub fn set_version(&self, version: &str) {
        self.state().version = version.to_string();
    }

    pub fn set_admin(&self, admin: bool) {
        self.state().admin = admin;
    }

    pub fn set_calico_version(&self, version: Option<&str>) {
        self.state().calico = version.map(String::from);
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        self.state().readiness = readiness;
    }

    /// Make every call of the named `ClusterApi` method fail
    pub fn fail_on(&self, op: &str) {
        self.state().failures.insert(op.to_string());
    }

    /// Make every call of the named `ClusterApi` method panic
    pub fn panic_on(&self, op: &str) {
        self.state().panics.insert(op.to_string());
    }

    /// Mutating calls in the order they happened, as `"<op> <ns>/<name>"`
    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    pub fn has_secret(&self, namespace: &str, name: &str) -> bool {
        self.state()
            .secrets
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    pub fn has_service(&self, namespace: &str, name: &str) -> bool {
        self.state()
            .services
            .contains(&(namespace.to_string(), name.to_string()))
    }

    pub fn has_stateful_set(&self, namespace: &str, name: &str) -> bool {
        self.state()
            .stateful_sets
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    /// Number of objects created by the audit that still exist
    pub fn live_objects(&self) -> usize {
        let state = self.state();
        state.services.len() + state.stateful_sets.len() + state.pvcs.len()
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn health_check(&self) -> AuditResult<()> {
        self.state().check("health_check")
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> AuditResult<Option<SecretSpec>> {
        let state = self.state();
        state.check("get_secret")?;
        Ok(state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_secret(&self, spec: &SecretSpec) -> AuditResult<()> {
        let mut state = self.state();
        state.check("create_secret")?;
        state.record("create_secret", &spec.namespace, &spec.name);
        state
            .secrets
            .insert((spec.namespace.clone(), spec.name.clone()), spec.clone());
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> AuditResult<()> {
        let mut state = self.state();
        state.check("delete_secret")?;
        state.record("delete_secret", namespace, name);
        state
            .secrets
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn create_service(&self, spec: &HeadlessServiceSpec) -> AuditResult<()> {
        let mut state = self.state();
        state.check("create_service")?;
        state.record("create_service", &spec.namespace, &spec.name);
        state
            .services
            .insert((spec.namespace.clone(), spec.name.clone()));
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> AuditResult<()> {
        let mut state = self.state();
        state.check("delete_service")?;
        state.record("delete_service", namespace, name);
        state
            .services
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn create_stateful_set(&self, spec: &ProbeWorkloadSpec) -> AuditResult<()> {
        let mut state = self.state();
        state.check("create_stateful_set")?;
        state.record("create_stateful_set", &spec.namespace, &spec.name);

        let labels = to_map(&[("app", spec.name.as_str())]);
        for i in 0..spec.replicas.max(0) as usize {
            let node = match state.nodes.len() {
                0 => String::new(),
                n => state.nodes[i % n].name.clone(),
            };
            state.pods.insert(
                format!("{}-{}", spec.name, i),
                PodState {
                    namespace: spec.namespace.clone(),
                    labels: labels.clone(),
                    node,
                },
            );
            if let Some(volume) = &spec.volume {
                state.pvcs.insert(
                    (
                        spec.namespace.clone(),
                        format!("{}-{}-{}", volume.name, spec.name, i),
                    ),
                    labels.clone(),
                );
            }
        }

        state.stateful_sets.insert(
            (spec.namespace.clone(), spec.name.clone()),
            WorkloadState {
                spec: spec.clone(),
                polls: 0,
            },
        );
        Ok(())
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> AuditResult<Option<WorkloadStatus>> {
        let mut state = self.state();
        state.check("get_stateful_set")?;
        let readiness = state.readiness;

        let Some(workload) = state
            .stateful_sets
            .get_mut(&(namespace.to_string(), name.to_string()))
        else {
            return Ok(None);
        };
        workload.polls += 1;

        let ready_replicas = match readiness {
            Readiness::Immediate => Some(workload.spec.replicas),
            Readiness::AfterPolls(n) if workload.polls > n => Some(workload.spec.replicas),
            Readiness::AfterPolls(_) | Readiness::Never => None,
        };

        Ok(Some(WorkloadStatus {
            name: workload.spec.name.clone(),
            namespace: workload.spec.namespace.clone(),
            labels: to_map(&[("app", workload.spec.name.as_str())]),
            replicas: workload.spec.replicas,
            ready_replicas,
        }))
    }

    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> AuditResult<()> {
        let mut state = self.state();
        state.check("delete_stateful_set")?;
        state.record("delete_stateful_set", namespace, name);
        state
            .stateful_sets
            .remove(&(namespace.to_string(), name.to_string()));
        state.pods.retain(|_, pod| {
            !(pod.namespace == namespace && pod.labels.get("app").map(String::as_str) == Some(name))
        });
        Ok(())
    }

    async fn list_pvcs(&self, namespace: &str, label_selector: &str) -> AuditResult<Vec<String>> {
        let state = self.state();
        state.check("list_pvcs")?;
        Ok(state
            .pvcs
            .iter()
            .filter(|((ns, _), labels)| ns == namespace && matches_selector(labels, label_selector))
            .map(|((_, name), _)| name.clone())
            .collect())
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> AuditResult<()> {
        let mut state = self.state();
        state.check("delete_pvc")?;
        state.record("delete_pvc", namespace, name);
        state.pvcs.remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_nodes(&self, label_selector: Option<&str>) -> AuditResult<Vec<NodeInfo>> {
        let state = self.state();
        state.check("list_nodes")?;
        Ok(state
            .nodes
            .iter()
            .filter(|node| label_selector.map_or(true, |s| matches_selector(&node.labels, s)))
            .cloned()
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> AuditResult<Vec<String>> {
        let state = self.state();
        state.check("list_pods")?;
        let node_filter = field_selector.and_then(|s| s.strip_prefix("spec.nodeName="));

        Ok(state
            .pods
            .iter()
            .filter(|(_, pod)| pod.namespace == namespace)
            .filter(|(_, pod)| label_selector.map_or(true, |s| matches_selector(&pod.labels, s)))
            .filter(|(_, pod)| node_filter.map_or(true, |node| pod.node == node))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn exec(&self, _namespace: &str, pod: &str, command: &str) -> AuditResult<String> {
        let state = self.state();
        state.check("exec")?;

        let matching = |r: &&ExecResponse| command.contains(&r.pattern);
        let response = state
            .exec_responses
            .iter()
            .rev()
            .filter(matching)
            .find(|r| r.pod.as_deref() == Some(pod))
            .or_else(|| {
                state
                    .exec_responses
                    .iter()
                    .rev()
                    .filter(matching)
                    .find(|r| r.pod.is_none())
            });

        response
            .map(|r| r.output.trim().to_string())
            .ok_or_else(|| AuditError::Exec(format!("command exited with non-zero status: {}", command)))
    }

    async fn server_version(&self) -> AuditResult<String> {
        let state = self.state();
        state.check("server_version")?;
        Ok(state.version.clone())
    }

    async fn list_namespaces(&self) -> AuditResult<Vec<String>> {
        let state = self.state();
        state.check("list_namespaces")?;
        Ok(state.namespaces.clone())
    }

    async fn list_resource_quotas(&self) -> AuditResult<Vec<BTreeMap<String, String>>> {
        let state = self.state();
        state.check("list_resource_quotas")?;
        Ok(state.quotas.clone())
    }

    async fn can_administer(&self) -> AuditResult<bool> {
        let state = self.state();
        state.check("can_administer")?;
        Ok(state.admin)
    }

    async fn calico_version(&self) -> AuditResult<Option<String>> {
        let state = self.state();
        state.check("calico_version")?;
        Ok(state.calico.clone())
    }
}

/// Connector handing out a shared `MemoryCluster`
#[derive(Debug, Default)]
pub struct MemoryConnector {
    cluster: Arc<MemoryCluster>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(cluster: Arc<MemoryCluster>) -> Self {
        Self {
            cluster,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn cluster(&self) -> &Arc<MemoryCluster> {
        &self.cluster
    }

    /// Number of sessions opened so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnector for MemoryConnector {
    async fn connect(&self) -> AuditResult<Arc<dyn ClusterApi>> {
        {
            let mut state = self.cluster.state();
            state.check("connect")?;
            state.journal.push("connect".to_string());
        }
        self.cluster.health_check().await?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.cluster.clone())
    }
}

fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Equality-based label selector (`k=v,k2=v2` or bare `k`)
fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}
