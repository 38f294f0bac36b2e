//! Common test utilities and helpers

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use compliance_engine::config::{AuditConfig, RegistryCredentials};
use compliance_engine::fakes::{MemoryCluster, MemoryConnector};
use compliance_engine::{Check, CheckContext, CheckOutcome, Dependency, DependencyProvider};
use compliance_common::Phase;

/// Check returning a fixed outcome and counting its runs
pub struct StaticCheck {
    pub id: &'static str,
    pub outcome: Option<CheckOutcome>,
    pub requires: &'static [Dependency],
    pub runs: Arc<AtomicUsize>,
}

impl StaticCheck {
    pub fn new(id: &'static str, result: bool, measured: &str, expected: &str) -> Self {
        Self {
            id,
            outcome: Some(CheckOutcome::new(result, measured, expected)),
            requires: &[],
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn requiring(mut self, requires: &'static [Dependency]) -> Self {
        self.requires = requires;
        self
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }
}

#[async_trait]
impl Check for StaticCheck {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.id
    }

    fn description(&self) -> &str {
        "Static test check"
    }

    fn requires(&self) -> &[Dependency] {
        self.requires
    }

    async fn perform_check(&self, _ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// Check that panics after its resources were provisioned
pub struct PanickingCheck {
    pub requires: &'static [Dependency],
}

#[async_trait]
impl Check for PanickingCheck {
    fn id(&self) -> &str {
        "panicking"
    }

    fn name(&self) -> &str {
        "Panicking check"
    }

    fn description(&self) -> &str {
        "Check that never finishes normally"
    }

    fn requires(&self) -> &[Dependency] {
        self.requires
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let workload = ctx.workload(Dependency::SinglePod)?;
        panic!("probe {} misbehaved", workload.name);
    }
}

/// Configuration with registry credentials, past the contract phase
pub fn create_test_config() -> AuditConfig {
    AuditConfig {
        phase: Phase::PreInstall,
        registry: RegistryCredentials {
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Fake cluster with `nodes` unlabelled nodes
pub fn create_test_cluster(nodes: usize) -> Arc<MemoryCluster> {
    let cluster = Arc::new(MemoryCluster::new());
    for i in 0..nodes {
        cluster.add_node(&format!("node-{}", i), &[], &[]);
    }
    cluster
}

pub fn create_test_provider(
    cluster: &Arc<MemoryCluster>,
    config: AuditConfig,
) -> (DependencyProvider, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::new(cluster.clone()));
    let provider = DependencyProvider::new(Arc::new(config), connector.clone());
    (provider, connector)
}
