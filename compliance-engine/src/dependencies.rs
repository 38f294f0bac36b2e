//! Section-scoped dependency provisioning
//!
//! Checks declare the resources they need as `Dependency` keys. Before a
//! section runs, the provider resolves the union of its keys (including
//! what those keys themselves need) into a `SectionResources` bundle. The
//! bundle owns the spawner, so releasing it tears down everything that was
//! created for the section, whether or not provisioning completed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AuditConfig;
use crate::error::AuditResult;
use crate::kubernetes::{
    ClusterApi, ClusterConnector, HeadlessServiceSpec, ProbeWorkloadSpec, VolumeClaimSpec,
};
use crate::poll::wait_for_ready;
use crate::spawner::Spawner;

const POD_ON_EACH_NODE: &str = "pod-on-each-node";
const POD_WITH_VOLUME_ON_EACH_NODE: &str = "pod-with-volume-on-each-node";
const SINGLE_POD: &str = "single-pod";
const PROBE_VOLUME_SIZE: &str = "1Gi";
const PROBE_MOUNT_PATH: &str = "/mnt";
const EACH_NODE_READY_TIMEOUT: Duration = Duration::from_secs(120);
const SINGLE_POD_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// A resource a check can ask its section to provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dependency {
    /// Connected cluster API handle
    Cluster,
    /// Image pull secret for the probe image registry
    RegistrySecret,
    /// One probe pod on every node
    PodOnEachNode,
    /// One probe pod on every node, each with a fresh volume at `/mnt`
    PodWithVolumeOnEachNode,
    /// A single probe pod
    SinglePod,
}

impl Dependency {
    /// Keys this one needs provisioned first
    pub fn prerequisites(&self) -> &'static [Dependency] {
        match self {
            Self::Cluster => &[],
            Self::RegistrySecret => &[Self::Cluster],
            Self::PodOnEachNode | Self::PodWithVolumeOnEachNode | Self::SinglePod => {
                &[Self::RegistrySecret]
            }
        }
    }

    /// `keys` plus everything they transitively need, in provisioning order
    pub fn closure<'a>(keys: impl IntoIterator<Item = &'a Dependency>) -> BTreeSet<Dependency> {
        let mut resolved = BTreeSet::new();
        let mut pending: Vec<Dependency> = keys.into_iter().copied().collect();

        while let Some(key) = pending.pop() {
            if resolved.insert(key) {
                pending.extend_from_slice(key.prerequisites());
            }
        }

        resolved
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => write!(f, "cluster"),
            Self::RegistrySecret => write!(f, "registry-secret"),
            Self::PodOnEachNode => write!(f, "{}", POD_ON_EACH_NODE),
            Self::PodWithVolumeOnEachNode => write!(f, "{}", POD_WITH_VOLUME_ON_EACH_NODE),
            Self::SinglePod => write!(f, "{}", SINGLE_POD),
        }
    }
}

/// A ready probe workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeWorkload {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
}

impl ProbeWorkload {
    /// Label selector matching the workload's pods
    pub fn selector(&self) -> String {
        format!("app={}", self.name)
    }

    /// Names of the workload's pods, in ordinal order
    pub fn pod_names(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.replicas.max(0)).map(move |i| format!("{}-{}", self.name, i))
    }
}

/// Resources provisioned for one section
#[derive(Debug, Default)]
pub struct SectionResources {
    pub cluster: Option<Arc<dyn ClusterApi>>,
    pub spawner: Option<Spawner>,
    pub registry_secret: Option<String>,
    pub workloads: BTreeMap<Dependency, ProbeWorkload>,
}

impl SectionResources {
    /// Tear down everything created for the section and drop the session
    pub async fn release(&mut self) {
        if let Some(mut spawner) = self.spawner.take() {
            spawner.release().await;
        }
        self.workloads.clear();
        self.registry_secret = None;
        self.cluster = None;
    }
}

/// Supplies sections with the resources their checks declare
pub struct DependencyProvider {
    config: Arc<AuditConfig>,
    connector: Arc<dyn ClusterConnector>,
}

impl DependencyProvider {
    pub fn new(config: Arc<AuditConfig>, connector: Arc<dyn ClusterConnector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &Arc<AuditConfig> {
        &self.config
    }

    /// Provision `keys` and their prerequisites into `resources`.
    ///
    /// On error, whatever was created so far is already recorded in
    /// `resources` and must still be released by the caller.
    pub async fn provision(
        &self,
        keys: &BTreeSet<Dependency>,
        resources: &mut SectionResources,
    ) -> AuditResult<()> {
        for key in Dependency::closure(keys) {
            tracing::debug!(dependency = %key, "Provisioning");
            match key {
                Dependency::Cluster => {
                    let cluster = self.connector.connect().await?;
                    resources.spawner = Some(Spawner::new(cluster.clone()));
                    resources.cluster = Some(cluster);
                }
                Dependency::RegistrySecret => {
                    let docker_config = self.config.registry.docker_config_json();
                    let spawner = spawner(resources)?;
                    let secret = spawner
                        .secret(
                            &self.config.namespace,
                            &self.config.registry.secret_name,
                            docker_config.as_deref(),
                        )
                        .await?;
                    resources.registry_secret = Some(secret.name);
                }
                Dependency::PodOnEachNode => {
                    let workload = self.pod_on_each_node(resources, POD_ON_EACH_NODE, false).await?;
                    resources.workloads.insert(key, workload);
                }
                Dependency::PodWithVolumeOnEachNode => {
                    let workload = self
                        .pod_on_each_node(resources, POD_WITH_VOLUME_ON_EACH_NODE, true)
                        .await?;
                    resources.workloads.insert(key, workload);
                }
                Dependency::SinglePod => {
                    let spec = self.probe_spec(resources, SINGLE_POD).replicas(1);
                    let workload = spawn_ready(resources, spec, SINGLE_POD_READY_TIMEOUT).await?;
                    resources.workloads.insert(key, workload);
                }
            }
        }

        Ok(())
    }

    async fn pod_on_each_node(
        &self,
        resources: &mut SectionResources,
        name: &str,
        with_volume: bool,
    ) -> AuditResult<ProbeWorkload> {
        let cluster = spawner(resources)?.cluster().clone();
        let node_count = cluster.list_nodes(None).await?.len() as i32;

        let mut spec = self
            .probe_spec(resources, name)
            .replicas(node_count)
            .service(name);
        if with_volume {
            spec = spec.volume(VolumeClaimSpec {
                name: name.to_string(),
                mount_path: PROBE_MOUNT_PATH.to_string(),
                size: PROBE_VOLUME_SIZE.to_string(),
                storage_class: self.config.storage_class.clone(),
            });
        }

        spawn_ready(resources, spec, EACH_NODE_READY_TIMEOUT).await
    }

    fn probe_spec(&self, resources: &SectionResources, name: &str) -> ProbeWorkloadSpec {
        ProbeWorkloadSpec::new(name, &self.config.namespace, &self.config.tools_image)
            .pull_secret(resources.registry_secret.clone())
    }
}

fn spawner(resources: &mut SectionResources) -> AuditResult<&mut Spawner> {
    resources
        .spawner
        .as_mut()
        .ok_or_else(|| crate::error::AuditError::NotProvisioned(Dependency::Cluster.to_string()))
}

async fn spawn_ready(
    resources: &mut SectionResources,
    spec: ProbeWorkloadSpec,
    timeout: Duration,
) -> AuditResult<ProbeWorkload> {
    let spawner = spawner(resources)?;
    if let Some(service) = &spec.service_name {
        spawner
            .service(&HeadlessServiceSpec::new(service, &spec.namespace))
            .await?;
    }
    spawner.stateful_set(&spec).await?;
    wait_for_ready(
        spawner.cluster().as_ref(),
        &spec.namespace,
        &spec.name,
        spec.replicas,
        timeout,
    )
    .await?;

    Ok(ProbeWorkload {
        name: spec.name,
        namespace: spec.namespace,
        replicas: spec.replicas,
    })
}
