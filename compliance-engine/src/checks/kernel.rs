//! Kernel parameters read on every node

use anyhow::Context;
use async_trait::async_trait;

use super::exec_on_each_pod;
use crate::check::{Check, CheckContext};
use crate::dependencies::Dependency;
use crate::section::Section;
use crate::util::format_list;
use compliance_common::CheckOutcome;

pub(super) fn section() -> Section {
    Section::new("kernel", "Kernel", "Checks related to kernel parameters")
        .with_check(Sysctl::new(
            "IONotifyMaxUserWatches",
            "fs.inotify.max_user_watches",
            65536,
        ))
        .with_check(Sysctl::new(
            "IONotifyMaxUserInstances",
            "fs.inotify.max_user_instances",
            1024,
        ))
}

/// A sysctl value that must be at least `minimum` on every node
#[derive(Debug)]
struct Sysctl {
    id: &'static str,
    variable: &'static str,
    description: String,
    minimum: u64,
}

impl Sysctl {
    fn new(id: &'static str, variable: &'static str, minimum: u64) -> Self {
        Self {
            id,
            variable,
            description: format!("Checks {} kernel value for each kubernetes node", variable),
            minimum,
        }
    }
}

/// Value from `sysctl` output such as `fs.inotify.max_user_watches = 8192`
fn sysctl_value(output: &str) -> &str {
    output.rsplit(' ').next().unwrap_or(output)
}

#[async_trait]
impl Check for Sysctl {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.variable
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn requires(&self) -> &[Dependency] {
        &[Dependency::Cluster, Dependency::PodOnEachNode]
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let command = format!("sysctl {}", self.variable);
        let outputs = exec_on_each_pod(ctx, Dependency::PodOnEachNode, &command).await?;

        let mut values = Vec::with_capacity(outputs.len());
        for output in &outputs {
            let value = sysctl_value(output);
            let value: u64 = value
                .parse()
                .with_context(|| format!("unexpected sysctl output: {:?}", output))?;
            values.push(value);
        }

        let result = values.iter().all(|value| *value >= self.minimum);
        Ok(Some(CheckOutcome::new(
            result,
            format_list(&values),
            format!(">= {}", self.minimum),
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::checks::testing;
    use crate::fakes::MemoryCluster;

    fn watches() -> Sysctl {
        Sysctl::new("IONotifyMaxUserWatches", "fs.inotify.max_user_watches", 65536)
    }

    #[test]
    fn test_sysctl_value() {
        assert_eq!(sysctl_value("fs.inotify.max_user_watches = 8192"), "8192");
        assert_eq!(sysctl_value("8192"), "8192");
    }

    #[tokio::test]
    async fn test_every_node_must_pass() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_node("node-a", &[], &[]);
        cluster.add_node("node-b", &[], &[]);
        cluster.respond_to("max_user_watches", "fs.inotify.max_user_watches = 524288");
        cluster.respond_to_pod(
            "pod-on-each-node-1",
            "max_user_watches",
            "fs.inotify.max_user_watches = 8192",
        );

        let outcome = testing::run(&cluster, &testing::config(), &watches())
            .await
            .unwrap();

        assert!(!outcome.result);
        assert_eq!(outcome.measured, "[524288, 8192]");
        assert_eq!(outcome.expected, ">= 65536");
    }

    #[tokio::test]
    async fn test_passes_on_all_nodes() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_node("node-a", &[], &[]);
        cluster.respond_to("max_user_watches", "fs.inotify.max_user_watches = 65536");

        let outcome = testing::run(&cluster, &testing::config(), &watches())
            .await
            .unwrap();
        assert!(outcome.result);
    }

    #[tokio::test]
    async fn test_garbage_output_is_an_error() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_node("node-a", &[], &[]);
        cluster.respond_to("max_user_watches", "sysctl: permission denied");

        let config = testing::config();
        let mut resources = testing::provision(&cluster, &config, &watches()).await;
        let ctx = CheckContext::new(&config, &resources);
        assert!(watches().perform_check(&ctx).await.is_err());
        resources.release().await;
    }
}
