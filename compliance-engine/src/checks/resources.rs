//! Node counts and node capacity per nodepool

use anyhow::Context;
use async_trait::async_trait;

use super::pascal_case;
use crate::check::{major_problem, Check, CheckContext};
use crate::dependencies::Dependency;
use crate::kubernetes::NodeInfo;
use crate::requirements::NodepoolRequirement;
use crate::section::Section;
use crate::util::{format_gib, format_list, parse_bytes, parse_cpus, GIB};
use compliance_common::{CheckOutcome, Phase};

const NODEPOOLS: [&str; 5] = ["apps", "tools", "services", "clickhouse", "clickhouse_trucker"];
/// Share of the required capacity a node may lack (reserved by the system)
const CAPACITY_TOLERANCE: f64 = 0.05;

pub(super) fn section() -> Section {
    let mut section = Section::new(
        "resources",
        "Resources",
        "Checks ensuring that infrastructure meets our Hardware and Software Requirements needs.",
    );

    for measure in [
        Measure::Nodes,
        Measure::Cpus,
        Measure::Memory,
        Measure::EphemeralStorage,
    ] {
        for nodepool in NODEPOOLS {
            section.register(NodepoolResource::new(measure, nodepool));
        }
    }
    section
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Measure {
    Nodes,
    Cpus,
    Memory,
    EphemeralStorage,
}

/// One measure of one nodepool against the tier's requirements
#[derive(Debug)]
struct NodepoolResource {
    id: String,
    name: String,
    description: String,
    measure: Measure,
    nodepool: &'static str,
}

impl NodepoolResource {
    fn new(measure: Measure, nodepool: &'static str) -> Self {
        let pool = pascal_case(nodepool);
        let (id, name, description) = match measure {
            Measure::Nodes => (
                format!("NumberOfNodesIn{}", pool),
                format!("Number of nodes in \"{}\" nodepool", nodepool),
                format!("Ensure that nodes count in \"{}\" nodepool matches our requirements", nodepool),
            ),
            Measure::Cpus => (
                format!("CPUInNodesIn{}", pool),
                format!("Number of CPUs in \"{}\" nodepool", nodepool),
                format!("Ensure that each node in \"{}\" nodepool has enough CPUs", nodepool),
            ),
            Measure::Memory => (
                format!("MemoryInNodesIn{}", pool),
                format!("Nodes' memory in \"{}\" nodepool", nodepool),
                format!("Ensure that each node in \"{}\" nodepool has enough memory", nodepool),
            ),
            Measure::EphemeralStorage => (
                format!("EphemeralStorageInNodesIn{}", pool),
                format!("Nodes' ephemeral storage in \"{}\" nodepool", nodepool),
                format!(
                    "Ensure that each node in \"{}\" nodepool has enough ephemeral storage",
                    nodepool
                ),
            ),
        };

        Self {
            id,
            name,
            description,
            measure,
            nodepool,
        }
    }

    fn evaluate(&self, required: &NodepoolRequirement, nodes: &[NodeInfo]) -> anyhow::Result<CheckOutcome> {
        let outcome = match self.measure {
            Measure::Nodes => CheckOutcome::new(
                nodes.len() as u64 >= u64::from(required.nodes),
                nodes.len().to_string(),
                format!(">= {}", required.nodes),
            ),
            Measure::Cpus => {
                let cpus = nodes
                    .iter()
                    .map(|node| {
                        capacity(node, "cpu").and_then(|cpu| {
                            parse_cpus(cpu).with_context(|| format!("invalid CPU capacity {:?}", cpu))
                        })
                    })
                    .collect::<anyhow::Result<Vec<f64>>>()?;
                CheckOutcome::new(
                    cpus.iter().all(|cpu| *cpu >= f64::from(required.cpus)),
                    format_list(&cpus),
                    format!(">= {}", required.cpus),
                )
            }
            Measure::Memory => bytes_outcome(nodes, "memory", required.memory_gib * GIB)?,
            Measure::EphemeralStorage => {
                bytes_outcome(nodes, "ephemeral-storage", required.disk_space_gib * GIB)?
            }
        };
        Ok(outcome)
    }
}

fn capacity<'a>(node: &'a NodeInfo, resource: &str) -> anyhow::Result<&'a str> {
    node.capacity
        .get(resource)
        .map(String::as_str)
        .with_context(|| format!("node {} reports no {} capacity", node.name, resource))
}

/// Every node must have at least the required bytes, minus the tolerance
fn bytes_outcome(nodes: &[NodeInfo], resource: &str, required: u64) -> anyhow::Result<CheckOutcome> {
    let sizes = nodes
        .iter()
        .map(|node| {
            capacity(node, resource).and_then(|quantity| {
                parse_bytes(quantity).with_context(|| format!("invalid {} capacity {:?}", resource, quantity))
            })
        })
        .collect::<anyhow::Result<Vec<u64>>>()?;

    let minimum = required as f64 * (1.0 - CAPACITY_TOLERANCE);
    let measured: Vec<String> = sizes.iter().map(|size| format_gib(*size)).collect();

    Ok(CheckOutcome::new(
        sizes.iter().all(|size| *size as f64 >= minimum),
        format_list(&measured),
        format!(">= {}", format_gib(required)),
    ))
}

#[async_trait]
impl Check for NodepoolResource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn requires(&self) -> &[Dependency] {
        &[Dependency::Cluster]
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let config = ctx.config();
        if config.phase == Phase::PreContract {
            return Ok(None);
        }
        let Some(required) = config.requirements.nodepool(self.nodepool) else {
            return Ok(None);
        };

        let nodes = ctx.cluster()?.list_nodes(Some(self.nodepool)).await?;
        if nodes.is_empty() {
            let problem = format!("No nodes with \"{}\" label found", self.nodepool);
            return Ok(Some(major_problem(self, problem)));
        }

        self.evaluate(required, &nodes).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::checks::testing;
    use crate::config::AuditConfig;
    use crate::fakes::MemoryCluster;
    use compliance_common::MonthlyTraffic;

    fn apps_node(cluster: &MemoryCluster, name: &str, cpu: &str, memory: &str) {
        cluster.add_node(
            name,
            &[("apps", "true")],
            &[("cpu", cpu), ("memory", memory), ("ephemeral-storage", "100Gi")],
        );
    }

    #[test]
    fn test_catalog_names() {
        let check = NodepoolResource::new(Measure::Memory, "clickhouse_trucker");
        assert_eq!(check.id(), "MemoryInNodesInClickhouseTrucker");
        assert_eq!(check.name(), "Nodes' memory in \"clickhouse_trucker\" nodepool");
        assert_eq!(section().checks().len(), 20);
    }

    #[tokio::test]
    async fn test_node_count() {
        let cluster = Arc::new(MemoryCluster::new());
        apps_node(&cluster, "node-a", "4", "16Gi");
        apps_node(&cluster, "node-b", "4", "16Gi");

        let check = NodepoolResource::new(Measure::Nodes, "apps");
        let outcome = testing::run(&cluster, &testing::config(), &check).await.unwrap();
        assert!(!outcome.result);
        assert_eq!(outcome.measured, "2");
        assert_eq!(outcome.expected, ">= 3");
    }

    #[tokio::test]
    async fn test_cpus_per_node() {
        let cluster = Arc::new(MemoryCluster::new());
        apps_node(&cluster, "node-a", "4", "16Gi");
        apps_node(&cluster, "node-b", "3500m", "16Gi");

        let check = NodepoolResource::new(Measure::Cpus, "apps");
        let outcome = testing::run(&cluster, &testing::config(), &check).await.unwrap();
        assert!(!outcome.result);
        assert_eq!(outcome.measured, "[4, 3.5]");
    }

    #[tokio::test]
    async fn test_memory_tolerance() {
        let cluster = Arc::new(MemoryCluster::new());
        // 15.63Gi is within 5% of the 16Gi requirement
        apps_node(&cluster, "node-a", "4", "16393916Ki");

        let check = NodepoolResource::new(Measure::Memory, "apps");
        let outcome = testing::run(&cluster, &testing::config(), &check).await.unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.measured, "[15.63Gi]");
        assert_eq!(outcome.expected, ">= 16Gi");

        apps_node(&cluster, "node-b", "4", "8Gi");
        let outcome = testing::run(&cluster, &testing::config(), &check).await.unwrap();
        assert!(!outcome.result);
    }

    #[tokio::test]
    async fn test_ephemeral_storage() {
        let cluster = Arc::new(MemoryCluster::new());
        apps_node(&cluster, "node-a", "4", "16Gi");

        let check = NodepoolResource::new(Measure::EphemeralStorage, "apps");
        let outcome = testing::run(&cluster, &testing::config(), &check).await.unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.expected, ">= 64Gi");
    }

    #[tokio::test]
    async fn test_missing_nodepool_is_a_fault() {
        let cluster = Arc::new(MemoryCluster::new());
        let check = NodepoolResource::new(Measure::Nodes, "tools");

        let outcome = testing::run(&cluster, &testing::config(), &check).await.unwrap();
        assert_eq!(outcome.fault.as_deref(), Some("No nodes with \"tools\" label found"));
    }

    #[tokio::test]
    async fn test_skips() {
        let cluster = Arc::new(MemoryCluster::new());
        let trucker = NodepoolResource::new(Measure::Nodes, "clickhouse_trucker");
        assert!(testing::run(&cluster, &testing::config(), &trucker).await.is_none());

        let config = AuditConfig {
            phase: Phase::PreContract,
            ..AuditConfig::for_traffic(MonthlyTraffic::M500)
        };
        assert!(testing::run(&cluster, &config, &trucker).await.is_none());
    }

    #[tokio::test]
    async fn test_trucker_checked_in_large_tiers() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_node("node-a", &[("clickhouse_trucker", "true")], &[]);

        let config = AuditConfig {
            phase: Phase::PreInstall,
            ..AuditConfig::for_traffic(MonthlyTraffic::M500)
        };
        let check = NodepoolResource::new(Measure::Nodes, "clickhouse_trucker");
        let outcome = testing::run(&cluster, &config, &check).await.unwrap();
        assert_eq!(outcome.measured, "1");
        assert_eq!(outcome.expected, ">= 2");
    }
}
