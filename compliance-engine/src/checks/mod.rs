//! Catalog of compliance checks, one module per section
//!
//! Check ids are the names accepted by `section.check` selectors.

mod disk_performance;
mod external_services;
mod kernel;
mod kubernetes;
mod performance;
mod resources;
mod storage;

use crate::check::CheckContext;
use crate::dependencies::{Dependency, ProbeWorkload};
use crate::error::AuditResult;
use crate::kubernetes::ClusterApi;
use crate::section::Section;

/// Every section with its checks, ordered by section id
pub fn catalog() -> Vec<Section> {
    vec![
        disk_performance::section(),
        external_services::section(),
        kernel::section(),
        kubernetes::section(),
        performance::section(),
        resources::section(),
        storage::section(),
    ]
}

/// Run `command` in every pod of a provisioned probe workload
async fn exec_on_each_pod(
    ctx: &CheckContext<'_>,
    dependency: Dependency,
    command: &str,
) -> AuditResult<Vec<String>> {
    let cluster = ctx.cluster()?;
    let workload = ctx.workload(dependency)?;

    let mut outputs = Vec::with_capacity(workload.replicas.max(0) as usize);
    for pod in workload.pod_names() {
        tracing::debug!(%pod, command, "Executing in pod");
        outputs.push(cluster.exec(&workload.namespace, &pod, command).await?);
    }
    Ok(outputs)
}

/// Pods of `workload` running on nodes labelled `<nodepool>=true`
async fn pods_in_nodepool(
    cluster: &dyn ClusterApi,
    workload: &ProbeWorkload,
    nodepool: &str,
) -> AuditResult<Vec<String>> {
    let selector = workload.selector();
    let nodes = cluster
        .list_nodes(Some(&format!("{}=true", nodepool)))
        .await?;

    let mut pods = Vec::new();
    for node in nodes {
        let field = format!("spec.nodeName={}", node.name);
        pods.extend(
            cluster
                .list_pods(&workload.namespace, Some(&selector), Some(&field))
                .await?,
        );
    }
    Ok(pods)
}

/// JSON document printed by a tool, skipping anything before the first `{`
fn parse_json_output(output: &str) -> Option<serde_json::Value> {
    let start = output.find('{')?;
    serde_json::from_str(&output[start..]).ok()
}

/// `clickhouse_trucker` -> `ClickhouseTrucker`
fn pascal_case(name: &str) -> String {
    name.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}
