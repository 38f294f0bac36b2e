//! Disk I/O benchmarks run with fio inside probe pods

use async_trait::async_trait;

use super::{parse_json_output, pascal_case, pods_in_nodepool};
use crate::check::{major_problem, Check, CheckContext};
use crate::config::AuditConfig;
use crate::dependencies::Dependency;
use crate::section::Section;
use compliance_common::{CheckOutcome, Phase};

const NODEPOOLS: [&str; 5] = ["apps", "services", "tools", "control", "clickhouse"];
const REQUIRES: &[Dependency] = &[Dependency::Cluster, Dependency::PodWithVolumeOnEachNode];

pub(super) fn section() -> Section {
    let mut section = Section::new(
        "disk_performance",
        "Disk I/O",
        "Check responsible for determining IOPS.",
    )
    .skip_when(|config| config.phase == Phase::PreContract);

    for nodepool in NODEPOOLS {
        section.register(DiskPerformance::nodepool(nodepool));
    }
    section.register(DiskPerformance::volume());
    section
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// Container filesystem of pods in a nodepool
    Nodepool(&'static str),
    /// The volume mounted at `/mnt` in every probe pod
    Volume,
}

/// Random write and read IOPS must reach the threshold on every pod
#[derive(Debug)]
struct DiskPerformance {
    id: String,
    name: String,
    description: String,
    target: Target,
}

impl DiskPerformance {
    fn nodepool(nodepool: &'static str) -> Self {
        let pool = pascal_case(nodepool);
        Self {
            id: format!("{}PodDiskPerformance", pool),
            name: format!("{} pod's disk performance", pool),
            description: format!(
                "Perform an I/O benchmark on pod's storage (runs on all nodes in the {} nodepool)",
                nodepool
            ),
            target: Target::Nodepool(nodepool),
        }
    }

    fn volume() -> Self {
        Self {
            id: "PVCPerformance".to_string(),
            name: "PVC performance".to_string(),
            description: "Perform an I/O benchmark on PVC".to_string(),
            target: Target::Volume,
        }
    }

    fn benchmark_file(&self) -> &'static str {
        match self.target {
            Target::Nodepool(_) => "$HOME/benchmark.fio",
            Target::Volume => "/mnt/benchmark.fio",
        }
    }

    /// Required IOPS; `None` when the tier says nothing about the target
    fn threshold(&self, config: &AuditConfig) -> Option<u32> {
        match self.target {
            Target::Nodepool(nodepool) => config.requirements.nodepool(nodepool).map(|pool| pool.iops),
            Target::Volume if config.requirements.pvcs.is_empty() => None,
            Target::Volume => Some(config.requirements.max_pvc_iops()),
        }
    }

    async fn pods(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Vec<String>> {
        let cluster = ctx.cluster()?;
        let workload = ctx.workload(Dependency::PodWithVolumeOnEachNode)?;

        let pods = match self.target {
            Target::Nodepool(nodepool) => pods_in_nodepool(cluster.as_ref(), workload, nodepool).await?,
            Target::Volume => {
                cluster
                    .list_pods(&workload.namespace, Some(&workload.selector()), None)
                    .await?
            }
        };
        Ok(pods)
    }
}

fn fio_command(filename: &str, readwrite: &str) -> String {
    format!(
        "fio --output-format=json --filename={} --name=test --ioengine=libaio --direct=1 \
         --gtod_reduce=1 --bs=4k --iodepth=64 --size=128Mi --readwrite={}",
        filename, readwrite
    )
}

/// `jobs[0].<direction>.iops_mean` of a fio JSON report
fn parse_iops(output: &str, direction: &str) -> Option<f64> {
    parse_json_output(output)?["jobs"][0][direction]["iops_mean"].as_f64()
}

#[async_trait]
impl Check for DiskPerformance {
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
        REQUIRES
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let Some(threshold) = self.threshold(ctx.config()) else {
            tracing::debug!(check = %self.name, "No IOPS requirement for this target");
            return Ok(None);
        };

        let pods = self.pods(ctx).await?;
        if pods.is_empty() {
            tracing::warn!(check = %self.name, "There are no pods matching check criteria");
            return Ok(None);
        }

        let cluster = ctx.cluster()?;
        let workload = ctx.workload(Dependency::PodWithVolumeOnEachNode)?;

        let mut measured = Vec::with_capacity(pods.len() * 2);
        for (readwrite, direction) in [("randwrite", "write"), ("randread", "read")] {
            let command = fio_command(self.benchmark_file(), readwrite);
            for pod in &pods {
                let output = cluster.exec(&workload.namespace, pod, &command).await?;
                match parse_iops(&output, direction) {
                    Some(iops) => measured.push(iops),
                    None => {
                        tracing::debug!(%pod, %output, "Unexpected fio output");
                        return Ok(Some(major_problem(self, "Failed to parse fio output")));
                    }
                }
            }
        }

        let lowest = measured.iter().copied().fold(f64::INFINITY, f64::min);
        Ok(Some(CheckOutcome::new(
            lowest >= f64::from(threshold),
            lowest.to_string(),
            format!(">= {}", threshold),
        )))
    }
}
