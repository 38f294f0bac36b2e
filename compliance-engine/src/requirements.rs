//! Hardware requirements based on expected monthly traffic

use compliance_common::MonthlyTraffic;
use serde::{Deserialize, Serialize};

/// Requirements for a single nodepool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodepoolRequirement {
    pub name: String,
    pub nodes: u32,
    pub cpus: u32,
    pub memory_gib: u64,
    pub disk_space_gib: u64,
    pub iops: u32,
}

/// Requirements for a single persistent volume claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvcRequirement {
    pub name: String,
    pub size_gib: u64,
    pub iops: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HardwareRequirements {
    pub nodepools: Vec<NodepoolRequirement>,
    pub pvcs: Vec<PvcRequirement>,
}

impl HardwareRequirements {
    /// First nodepool with the given name
    pub fn nodepool(&self, name: &str) -> Option<&NodepoolRequirement> {
        self.nodepools.iter().find(|pool| pool.name == name)
    }

    pub fn has_nodepool(&self, name: &str) -> bool {
        self.nodepool(name).is_some()
    }

    /// First PVC with the given name
    pub fn pvc(&self, name: &str) -> Option<&PvcRequirement> {
        self.pvcs.iter().find(|pvc| pvc.name == name)
    }

    /// Highest IOPS any single PVC needs
    pub fn max_pvc_iops(&self) -> u32 {
        self.pvcs.iter().map(|pvc| pvc.iops).max().unwrap_or(0)
    }

    /// Total PVC space in GiB
    pub fn total_pvc_size_gib(&self) -> u64 {
        self.pvcs.iter().map(|pvc| pvc.size_gib).sum()
    }

    /// Static requirement table for a traffic tier
    pub fn for_traffic(traffic: MonthlyTraffic) -> Self {
        match traffic {
            MonthlyTraffic::M10 => Self {
                nodepools: vec![
                    nodepool("apps", 3, 4, 16, 64, 500),
                    nodepool("tools", 1, 4, 32, 64, 240),
                    nodepool("services", 1, 8, 32, 64, 240),
                    nodepool("clickhouse", 1, 4, 16, 64, 500),
                ],
                pvcs: vec![
                    pvc("clickhouse", 256, 1000),
                    pvc("zookeeper", 32, 120),
                    pvc("rabbitmq", 32, 240),
                    pvc("consul", 16, 120),
                    pvc("redis", 16, 120),
                    pvc("redis_cache", 16, 120),
                    pvc("monitoring", 128, 500),
                ],
            },
            MonthlyTraffic::M50 => Self {
                nodepools: vec![
                    nodepool("apps", 3, 4, 16, 64, 500),
                    nodepool("tools", 1, 4, 32, 64, 240),
                    nodepool("services", 3, 4, 16, 64, 240),
                    nodepool("clickhouse", 2, 4, 16, 64, 500),
                ],
                pvcs: vec![
                    pvc("clickhouse", 256, 1000),
                    pvc("zookeeper", 32, 120),
                    pvc("zookeeper_data_transaction_log", 128, 500),
                    pvc("rabbitmq", 64, 240),
                    pvc("consul", 32, 120),
                    pvc("redis", 32, 120),
                    pvc("redis_cache", 32, 120),
                    pvc("monitoring", 256, 500),
                ],
            },
            MonthlyTraffic::M100 => Self {
                nodepools: vec![
                    nodepool("apps", 3, 4, 16, 64, 500),
                    nodepool("tools", 1, 4, 32, 64, 240),
                    nodepool("services", 3, 4, 16, 64, 240),
                    nodepool("clickhouse", 2, 4, 32, 64, 500),
                ],
                pvcs: vec![
                    pvc("clickhouse", 512, 2000),
                    pvc("zookeeper", 32, 120),
                    pvc("zookeeper_data_transaction_log", 128, 500),
                    pvc("rabbitmq", 64, 240),
                    pvc("consul", 32, 120),
                    pvc("redis", 32, 120),
                    pvc("redis_cache", 32, 120),
                    pvc("monitoring", 256, 500),
                ],
            },
            MonthlyTraffic::M250 => Self {
                nodepools: vec![
                    nodepool("apps", 3, 8, 16, 64, 500),
                    nodepool("tools", 1, 4, 32, 64, 240),
                    nodepool("services", 3, 8, 32, 64, 240),
                    nodepool("clickhouse", 4, 8, 64, 64, 500),
                    nodepool("clickhouse_trucker", 2, 4, 16, 64, 500),
                ],
                pvcs: vec![
                    pvc("clickhouse", 512, 2000),
                    pvc("clickhouse_trucker", 128, 1000),
                    pvc("zookeeper", 32, 120),
                    pvc("zookeeper_data_transaction_log", 128, 500),
                    pvc("rabbitmq", 128, 500),
                    pvc("consul", 32, 120),
                    pvc("redis", 32, 120),
                    pvc("redis_cache", 32, 120),
                    pvc("monitoring", 512, 2000),
                ],
            },
            MonthlyTraffic::M500 => Self {
                nodepools: vec![
                    nodepool("apps", 4, 8, 16, 64, 500),
                    nodepool("tools", 1, 4, 32, 64, 240),
                    nodepool("services", 3, 8, 32, 64, 240),
                    nodepool("clickhouse", 4, 16, 128, 64, 500),
                    nodepool("clickhouse_trucker", 2, 4, 16, 64, 500),
                ],
                pvcs: vec![
                    pvc("clickhouse", 1024, 5000),
                    pvc("clickhouse_trucker", 128, 1000),
                    pvc("zookeeper", 32, 120),
                    pvc("zookeeper_data_transaction_log", 128, 500),
                    pvc("rabbitmq", 128, 500),
                    pvc("consul", 32, 120),
                    pvc("redis", 32, 120),
                    pvc("redis_cache", 32, 120),
                    pvc("monitoring", 512, 2000),
                ],
            },
        }
    }
}

fn nodepool(
    name: &str,
    nodes: u32,
    cpus: u32,
    memory_gib: u64,
    disk_space_gib: u64,
    iops: u32,
) -> NodepoolRequirement {
    NodepoolRequirement {
        name: name.to_string(),
        nodes,
        cpus,
        memory_gib,
        disk_space_gib,
        iops,
    }
}

fn pvc(name: &str, size_gib: u64, iops: u32) -> PvcRequirement {
    PvcRequirement {
        name: name.to_string(),
        size_gib,
        iops,
    }
}
