//! Persistent volume provisioning and quotas

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use super::yes_no;
use crate::check::{Check, CheckContext};
use crate::dependencies::Dependency;
use crate::kubernetes::{ProbeWorkloadSpec, VolumeClaimSpec};
use crate::poll::wait_for_ready;
use crate::section::Section;
use crate::spawner::Spawner;
use crate::util::{parse_bytes, GIB};
use compliance_common::CheckOutcome;

const REQUEST_PVC_NAME: &str = "request-pvc";
const REQUEST_PVC_READY_TIMEOUT: Duration = Duration::from_secs(60);

const PVC_COUNT_QUOTA: &str = "persistentvolumeclaims";
const PVC_SIZE_QUOTA: &str = "requests.storage";

pub(super) fn section() -> Section {
    Section::new("storage", "Storage", "Checks related to persistent storage")
        .with_check(RequestingPvc::default())
        .with_check(QuotaForPvcCount)
        .with_check(QuotaForPvcSize)
}

/// Spawn a workload with a fresh volume and look for the mount inside it
#[derive(Debug)]
struct RequestingPvc {
    ready_timeout: Duration,
}

impl Default for RequestingPvc {
    fn default() -> Self {
        Self {
            ready_timeout: REQUEST_PVC_READY_TIMEOUT,
        }
    }
}

#[async_trait]
impl Check for RequestingPvc {
    fn id(&self) -> &str {
        "RequestingPVC"
    }

    fn name(&self) -> &str {
        "Requesting PVC"
    }

    fn description(&self) -> &str {
        "Ensures that disk space may be requested on demand."
    }

    fn requires(&self) -> &[Dependency] {
        &[Dependency::Cluster, Dependency::RegistrySecret]
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let config = ctx.config();
        let spec = ProbeWorkloadSpec::new(REQUEST_PVC_NAME, &config.namespace, &config.tools_image)
            .pull_secret(Some(ctx.registry_secret()?.to_string()))
            .volume(VolumeClaimSpec {
                name: "mnt".to_string(),
                mount_path: "/mnt".to_string(),
                size: "1Gi".to_string(),
                storage_class: config.storage_class.clone(),
            });
        let timeout = self.ready_timeout;

        let output = Spawner::scoped(ctx.cluster()?.clone(), |spawner| {
            Box::pin(async move {
                spawner.stateful_set(&spec).await?;
                let cluster = spawner.cluster().clone();
                wait_for_ready(
                    cluster.as_ref(),
                    &spec.namespace,
                    &spec.name,
                    spec.replicas,
                    timeout,
                )
                .await?;

                let pod = format!("{}-0", spec.name);
                cluster.exec(&spec.namespace, &pod, "mountpoint /mnt").await
            })
        })
        .await?;

        let mounted = output.contains("is a mountpoint");
        Ok(Some(CheckOutcome::new(mounted, yes_no(mounted), "Yes")))
    }
}

/// Smallest `quota` across all resource quotas, parsed with `parse`,
/// together with its raw value.
///
/// A value that does not parse fails the whole lookup, since it may be the
/// tightest limit.
fn tightest_quota<F>(
    quotas: &[BTreeMap<String, String>],
    quota: &str,
    parse: F,
) -> anyhow::Result<Option<(u64, String)>>
where
    F: Fn(&str) -> Option<u64>,
{
    let mut tightest: Option<(u64, String)> = None;
    for raw in quotas.iter().filter_map(|hard| hard.get(quota)) {
        let value = parse(raw).ok_or_else(|| anyhow!("Unparsable {} quota: {:?}", quota, raw))?;
        if tightest.as_ref().map_or(true, |(min, _)| value < *min) {
            tightest = Some((value, raw.clone()));
        }
    }
    Ok(tightest)
}

#[derive(Debug)]
struct QuotaForPvcCount;

#[async_trait]
impl Check for QuotaForPvcCount {
    fn id(&self) -> &str {
        "QuotaForPVCCount"
    }

    fn name(&self) -> &str {
        "Quota for PVC count"
    }

    fn description(&self) -> &str {
        "Checks if we can request enough PVCs needed for the product."
    }

    fn requires(&self) -> &[Dependency] {
        &[Dependency::Cluster]
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let needed = ctx.config().requirements.pvcs.len() as u64;
        let quotas = ctx.cluster()?.list_resource_quotas().await?;

        let Some((limit, raw)) =
            tightest_quota(&quotas, PVC_COUNT_QUOTA, |raw| raw.trim().parse().ok())?
        else {
            return Ok(None);
        };

        Ok(Some(CheckOutcome::new(
            limit >= needed,
            raw,
            format!(">= {}", needed),
        )))
    }
}

#[derive(Debug)]
struct QuotaForPvcSize;

#[async_trait]
impl Check for QuotaForPvcSize {
    fn id(&self) -> &str {
        "QuotaForPVCSize"
    }

    fn name(&self) -> &str {
        "Quota for PVC size"
    }

    fn description(&self) -> &str {
        "Checks if we can request large enough PVC to cover all product requirements."
    }

    fn requires(&self) -> &[Dependency] {
        &[Dependency::Cluster]
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let needed_gib = ctx.config().requirements.total_pvc_size_gib();
        let quotas = ctx.cluster()?.list_resource_quotas().await?;

        let Some((limit, raw)) = tightest_quota(&quotas, PVC_SIZE_QUOTA, parse_bytes)? else {
            return Ok(None);
        };

        Ok(Some(CheckOutcome::new(
            limit >= needed_gib * GIB,
            raw,
            format!(">= {}Gi", needed_gib),
        )))
    }
}
