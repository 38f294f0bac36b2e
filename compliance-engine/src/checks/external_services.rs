//! Reachability of services outside the cluster

use std::time::Duration;

use async_trait::async_trait;

use super::yes_no;
use crate::check::{major_problem, Check, CheckContext};
use crate::dependencies::Dependency;
use crate::kubernetes::ProbeWorkloadSpec;
use crate::poll::wait_for_ready;
use crate::section::Section;
use crate::spawner::Spawner;
use compliance_common::{CheckOutcome, MaintenanceType, Phase};

const PAGERDUTY_STATUS_URL: &str = "https://status.pagerduty.com/api/v2/status.json";
const REGISTRY_PROBE_NAME: &str = "backup-tools";
const REGISTRY_PROBE_IMAGE: &str = "framework/backup-tools:1.2.0";
const REGISTRY_PULL_TIMEOUT: Duration = Duration::from_secs(60);

pub(super) fn section() -> Section {
    Section::new(
        "external_services",
        "External services",
        "Checks related to access to external services",
    )
    .with_check(PagerDutyAccess)
    .with_check(RegistryAccess::default())
}

#[derive(Debug)]
struct PagerDutyAccess;

#[async_trait]
impl Check for PagerDutyAccess {
    fn id(&self) -> &str {
        "PagerDutyAccess"
    }

    fn name(&self) -> &str {
        "PagerDuty access"
    }

    fn description(&self) -> &str {
        "Check if cluster has access to PagerDuty"
    }

    fn requires(&self) -> &[Dependency] {
        &[Dependency::Cluster, Dependency::SinglePod]
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let config = ctx.config();
        if config.offline || config.maintenance_type == MaintenanceType::SelfSupport {
            return Ok(None);
        }

        let cluster = ctx.cluster()?;
        let workload = ctx.workload(Dependency::SinglePod)?;
        let pod = workload
            .pod_names()
            .next()
            .ok_or_else(|| anyhow::anyhow!("workload {} has no pods", workload.name))?;

        let command = format!(
            r#"curl -s -o /dev/null -w "%{{http_code}}" {}"#,
            PAGERDUTY_STATUS_URL
        );
        let status = cluster.exec(&workload.namespace, &pod, &command).await?;

        let reachable = status == "200";
        Ok(Some(CheckOutcome::new(reachable, yes_no(reachable), "Yes")))
    }
}

/// Pull an image from the configured registry with the registry secret
#[derive(Debug)]
struct RegistryAccess {
    ready_timeout: Duration,
}

impl Default for RegistryAccess {
    fn default() -> Self {
        Self {
            ready_timeout: REGISTRY_PULL_TIMEOUT,
        }
    }
}

#[async_trait]
impl Check for RegistryAccess {
    fn id(&self) -> &str {
        "RegistryAccess"
    }

    fn name(&self) -> &str {
        "Registry/ACR access"
    }

    fn description(&self) -> &str {
        "Check if kubernetes can pull Piwik PRO images from ACR or other registry"
    }

    fn requires(&self) -> &[Dependency] {
        &[Dependency::Cluster, Dependency::RegistrySecret]
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let config = ctx.config();
        if config.phase == Phase::PreContract {
            return Ok(None);
        }

        let image = format!("{}/{}", config.registry.server, REGISTRY_PROBE_IMAGE);
        let spec = ProbeWorkloadSpec::new(REGISTRY_PROBE_NAME, &config.namespace, image)
            .pull_secret(Some(ctx.registry_secret()?.to_string()));
        let timeout = self.ready_timeout;

        let pulled = Spawner::scoped(ctx.cluster()?.clone(), |spawner| {
            Box::pin(async move {
                spawner.stateful_set(&spec).await?;
                wait_for_ready(
                    spawner.cluster().as_ref(),
                    &spec.namespace,
                    &spec.name,
                    spec.replicas,
                    timeout,
                )
                .await
            })
        })
        .await;

        match pulled {
            Ok(_) => Ok(Some(CheckOutcome::new(true, "Yes", "Yes"))),
            Err(e) if e.is_timeout() => Ok(Some(major_problem(self, "Cannot access registry"))),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::checks::testing;
    use crate::fakes::{MemoryCluster, Readiness};

    #[tokio::test]
    async fn test_pagerduty_reachable() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_node("node-a", &[], &[]);
        cluster.respond_to("status.pagerduty.com", "200");

        let outcome = testing::run(&cluster, &testing::config(), &PagerDutyAccess)
            .await
            .unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.measured, "Yes");
    }

    #[tokio::test]
    async fn test_pagerduty_unreachable() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.respond_to("status.pagerduty.com", "000");

        let outcome = testing::run(&cluster, &testing::config(), &PagerDutyAccess)
            .await
            .unwrap();
        assert!(!outcome.result);
        assert_eq!(outcome.measured, "No");
    }

    #[tokio::test]
    async fn test_pagerduty_skipped_offline_or_self_support() {
        let cluster = Arc::new(MemoryCluster::new());

        let mut config = testing::config();
        config.offline = true;
        assert!(testing::run(&cluster, &config, &PagerDutyAccess).await.is_none());

        let mut config = testing::config();
        config.maintenance_type = MaintenanceType::SelfSupport;
        assert!(testing::run(&cluster, &config, &PagerDutyAccess).await.is_none());
    }

    #[tokio::test]
    async fn test_registry_access_cleans_up() {
        let cluster = Arc::new(MemoryCluster::new());

        let outcome = testing::run(&cluster, &testing::config(), &RegistryAccess::default())
            .await
            .unwrap();
        assert!(outcome.result);
        assert!(cluster
            .journal()
            .contains(&"delete_stateful_set default/backup-tools".to_string()));
        assert!(!cluster.has_stateful_set("default", REGISTRY_PROBE_NAME));
    }

    #[tokio::test]
    async fn test_registry_timeout_is_a_fault() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.set_readiness(Readiness::Never);
        let check = RegistryAccess {
            ready_timeout: Duration::from_millis(50),
        };

        let outcome = testing::run(&cluster, &testing::config(), &check).await.unwrap();
        assert!(!outcome.result);
        assert_eq!(outcome.fault.as_deref(), Some("Cannot access registry"));
        assert!(!cluster.has_stateful_set("default", REGISTRY_PROBE_NAME));
    }

    #[tokio::test]
    async fn test_registry_skipped_pre_contract() {
        let cluster = Arc::new(MemoryCluster::new());
        let mut config = testing::config();
        config.phase = Phase::PreContract;

        assert!(testing::run(&cluster, &config, &RegistryAccess::default())
            .await
            .is_none());
        assert!(!cluster.has_stateful_set("default", REGISTRY_PROBE_NAME));
    }
}
