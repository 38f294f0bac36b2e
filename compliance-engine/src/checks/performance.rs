//! CPU load on the nodes the product will share

use async_trait::async_trait;

use super::{exec_on_each_pod, parse_json_output};
use crate::check::{major_problem, Check, CheckContext};
use crate::dependencies::Dependency;
use crate::section::Section;
use crate::util::format_list;
use compliance_common::{CheckOutcome, Phase};

const MPSTAT_INTERVAL_SECS: u32 = 2;
const MPSTAT_COUNT: u32 = 5;
/// Highest acceptable user space CPU usage, in percent
const USER_CPU_THRESHOLD: f64 = 5.0;

pub(super) fn section() -> Section {
    Section::new(
        "performance",
        "Performance",
        "Checks responsible for ensuring that cluster has enough performance to handle PPAS",
    )
    .skip_when(|config| config.phase == Phase::PreContract)
    .with_check(NoisyNeighbours)
}

#[derive(Debug)]
struct NoisyNeighbours;

/// Highest `usr` load over every sample of an `mpstat -o JSON` report
fn max_user_load(output: &str) -> Option<f64> {
    let report = parse_json_output(output)?;
    let statistics = report["sysstat"]["hosts"][0]["statistics"].as_array()?;

    let mut max: Option<f64> = None;
    for sample in statistics {
        let usr = sample["cpu-load"][0]["usr"].as_f64()?;
        max = Some(max.map_or(usr, |m| m.max(usr)));
    }
    max
}

#[async_trait]
impl Check for NoisyNeighbours {
    fn id(&self) -> &str {
        "NoisyNeighbours"
    }

    fn name(&self) -> &str {
        "No noisy neighbours"
    }

    fn description(&self) -> &str {
        "Check that the cluster is not overloaded to ensure that the product will have enough \
         resources to run properly. Result is percentage of CPU usage for user space processes."
    }

    fn requires(&self) -> &[Dependency] {
        &[Dependency::Cluster, Dependency::PodOnEachNode]
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let command = format!("mpstat {} {} -o JSON", MPSTAT_INTERVAL_SECS, MPSTAT_COUNT);
        let outputs = exec_on_each_pod(ctx, Dependency::PodOnEachNode, &command).await?;

        let mut loads = Vec::with_capacity(outputs.len());
        for output in &outputs {
            match max_user_load(output) {
                Some(load) => loads.push(load),
                None => {
                    tracing::debug!(%output, "Unexpected mpstat output");
                    return Ok(Some(major_problem(self, "Failed to parse mpstat output")));
                }
            }
        }

        let result = loads.iter().all(|load| *load < USER_CPU_THRESHOLD);
        Ok(Some(CheckOutcome::new(
            result,
            format_list(&loads),
            format!("< {}", USER_CPU_THRESHOLD),
        )))
    }
}
