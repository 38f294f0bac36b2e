//! Cluster level settings: version, privileges, networking, namespaces

use std::collections::BTreeSet;

use async_trait::async_trait;

use super::yes_no;
use crate::check::{major_problem, Check, CheckContext};
use crate::dependencies::Dependency;
use crate::section::Section;
use crate::util::Version;
use compliance_common::CheckOutcome;

const CLUSTER: &[Dependency] = &[Dependency::Cluster];

const MIN_KUBERNETES: Version = Version::new(1, 21, 0);
const MAX_KUBERNETES: Version = Version::new(1, 24, 0);
const MIN_CALICO: Version = Version::new(3, 22, 0);

const SYSTEM_NAMESPACES: [&str; 7] = [
    "default",
    "kube-system",
    "kube-public",
    "kube-node-lease",
    "calico-system",
    "tigera-operator",
    "calico-apiserver",
];

pub(super) fn section() -> Section {
    Section::new(
        "kubernetes",
        "Kubernetes",
        "Checks related to kubernetes settings",
    )
    .with_check(KubernetesVersion)
    .with_check(ClusterAdminPrivileges)
    .with_check(CalicoVersion)
    .with_check(Namespaces)
}

#[derive(Debug)]
struct KubernetesVersion;

#[async_trait]
impl Check for KubernetesVersion {
    fn id(&self) -> &str {
        "KubernetesVersion"
    }

    fn name(&self) -> &str {
        "Kubernetes version"
    }

    fn description(&self) -> &str {
        "Ensures that kubernetes has supported version"
    }

    fn requires(&self) -> &[Dependency] {
        CLUSTER
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let measured = ctx.cluster()?.server_version().await?;
        let version: Version = measured.parse()?;

        let result = (MIN_KUBERNETES..=MAX_KUBERNETES).contains(&version);

        Ok(Some(CheckOutcome::new(
            result,
            measured,
            format!(">= {} and <= {}", MIN_KUBERNETES, MAX_KUBERNETES),
        )))
    }
}

#[derive(Debug)]
struct ClusterAdminPrivileges;

#[async_trait]
impl Check for ClusterAdminPrivileges {
    fn id(&self) -> &str {
        "ClusterAdminPrivileges"
    }

    fn name(&self) -> &str {
        "Cluster Admin privileges"
    }

    fn description(&self) -> &str {
        "Ensures that we have Cluster Admin level privileges"
    }

    fn requires(&self) -> &[Dependency] {
        CLUSTER
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let allowed = ctx.cluster()?.can_administer().await?;
        Ok(Some(CheckOutcome::new(allowed, yes_no(allowed), "Yes")))
    }
}

#[derive(Debug)]
struct CalicoVersion;

#[async_trait]
impl Check for CalicoVersion {
    fn id(&self) -> &str {
        "CalicoVersion"
    }

    fn name(&self) -> &str {
        "Calico version"
    }

    fn description(&self) -> &str {
        "Ensures that a supported version of Calico is running"
    }

    fn requires(&self) -> &[Dependency] {
        CLUSTER
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let measured = match ctx.cluster()?.calico_version().await {
            Ok(Some(version)) => version,
            Ok(None) => return Ok(Some(major_problem(self, "Calico information not found"))),
            Err(e) => {
                tracing::debug!("Reading Calico cluster information failed: {}", e);
                return Ok(Some(major_problem(self, "Calico information not found")));
            }
        };
        let version: Version = measured.parse()?;

        Ok(Some(CheckOutcome::new(
            version > MIN_CALICO,
            measured,
            format!("> v{}.{}", MIN_CALICO.major, MIN_CALICO.minor),
        )))
    }
}

#[derive(Debug)]
struct Namespaces;

/// `{a, b}`
fn format_set(values: &BTreeSet<String>) -> String {
    let items: Vec<&str> = values.iter().map(String::as_str).collect();
    format!("{{{}}}", items.join(", "))
}

#[async_trait]
impl Check for Namespaces {
    fn id(&self) -> &str {
        "Namespaces"
    }

    fn name(&self) -> &str {
        "Namespaces"
    }

    fn description(&self) -> &str {
        "Check if there are no unexpected namespaces"
    }

    fn requires(&self) -> &[Dependency] {
        CLUSTER
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
        let allowed: BTreeSet<String> = SYSTEM_NAMESPACES
            .iter()
            .map(|ns| ns.to_string())
            .chain(ctx.config().namespace_allowlist.iter().cloned())
            .collect();

        let unexpected: BTreeSet<String> = ctx
            .cluster()?
            .list_namespaces()
            .await?
            .into_iter()
            .filter(|ns| !allowed.contains(ns))
            .collect();

        let measured = if unexpected.is_empty() {
            String::new()
        } else {
            format!("Unexpected: {}", format_set(&unexpected))
        };

        Ok(Some(CheckOutcome::new(
            unexpected.is_empty(),
            measured,
            format!("Allowed: {}", format_set(&allowed)),
        )))
    }
}
