//! Catalog Tests
//! Full audit runs of the shipped checks against a healthy in-memory cluster

mod common;

use std::sync::Arc;

use common::{create_test_config, create_test_provider};
use compliance_engine::checks::catalog;
use compliance_engine::config::DEFAULT_REGISTRY_SECRET;
use compliance_engine::discovery::discover_sections;
use compliance_engine::fakes::MemoryCluster;
use compliance_engine::Orchestrator;
use compliance_common::Phase;

const HEALTHY_CAPACITY: [(&str, &str); 3] = [
    ("cpu", "8"),
    ("memory", "64Gi"),
    ("ephemeral-storage", "200Gi"),
];

fn fio_report(direction: &str, iops: u32) -> String {
    format!(
        r#"{{"jobs": [{{"jobname": "test", "{}": {{"iops_mean": {}}}}}]}}"#,
        direction, iops
    )
}

/// Cluster meeting every requirement of the smallest traffic tier
fn create_healthy_cluster() -> Arc<MemoryCluster> {
    let cluster = Arc::new(MemoryCluster::new());
    let pools = ["apps", "apps", "apps", "tools", "services", "clickhouse"];
    for (i, pool) in pools.into_iter().enumerate() {
        cluster.add_node(&format!("node-{}", i), &[(pool, "true")], &HEALTHY_CAPACITY);
    }

    cluster.respond_to("max_user_watches", "fs.inotify.max_user_watches = 524288");
    cluster.respond_to("max_user_instances", "fs.inotify.max_user_instances = 8192");
    cluster.respond_to("randwrite", &fio_report("write", 5000));
    cluster.respond_to("randread", &fio_report("read", 6000));
    cluster.respond_to(
        "mpstat",
        r#"{"sysstat": {"hosts": [{"statistics": [{"cpu-load": [{"cpu": "all", "usr": 1.25}]}]}]}}"#,
    );
    cluster.respond_to("status.pagerduty.com", "200");
    cluster.respond_to("mountpoint /mnt", "/mnt is a mountpoint");
    cluster
}

// ============== Full Run Tests ==============

#[tokio::test]
async fn test_healthy_cluster_passes() {
    let cluster = create_healthy_cluster();
    let (provider, _) = create_test_provider(&cluster, create_test_config());

    let report = Orchestrator::new(catalog(), provider).generate_report().await;

    let names: Vec<&str> = report.sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Disk I/O",
            "External services",
            "Kernel",
            "Kubernetes",
            "Performance",
            "Resources",
            "Storage"
        ]
    );
    for section in &report.sections {
        for record in &section.records {
            assert!(record.outcome.result, "{}: {:?}", record.name, record.outcome);
        }
    }
    assert!(report.result);
    assert!(report.faults.is_empty());

    assert_eq!(cluster.live_objects(), 0);
    assert!(!cluster.has_secret("default", DEFAULT_REGISTRY_SECRET));
}

#[tokio::test]
async fn test_pre_contract_runs_fewer_sections() {
    let cluster = create_healthy_cluster();
    let config = compliance_engine::AuditConfig {
        phase: Phase::PreContract,
        ..create_test_config()
    };
    let (provider, _) = create_test_provider(&cluster, config);

    let report = Orchestrator::new(catalog(), provider).generate_report().await;

    let names: Vec<&str> = report.sections.iter().map(|s| s.name.as_str()).collect();
    // Every resources check is skipped before the contract
    assert_eq!(
        names,
        vec!["External services", "Kernel", "Kubernetes", "Storage"]
    );
    assert!(report.result);
}

#[tokio::test]
async fn test_missing_nodepool_surfaces_as_fault() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.add_node("node-0", &[("apps", "true")], &HEALTHY_CAPACITY);
    let (provider, _) = create_test_provider(&cluster, create_test_config());

    let sections = discover_sections(&catalog(), &["resources.NumberOfNodesInTools"]).unwrap();
    let report = Orchestrator::new(sections, provider).generate_report().await;

    assert!(!report.result);
    assert_eq!(report.faults, vec!["No nodes with \"tools\" label found"]);
}

// ============== Discovery Tests ==============

#[test]
fn test_select_single_check() {
    let sections = discover_sections(&catalog(), &["kubernetes.CalicoVersion"]).unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].name(), "Kubernetes");
    assert_eq!(sections[0].checks().len(), 1);
    assert_eq!(sections[0].checks()[0].name(), "Calico version");
}

#[test]
fn test_select_whole_sections() {
    let sections = discover_sections(&catalog(), &["storage", "kernel"]).unwrap();
    let ids: Vec<&str> = sections.iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec!["kernel", "storage"]);
    assert_eq!(sections[1].checks().len(), 3);
}

#[test]
fn test_invalid_selector() {
    let err = discover_sections(&catalog(), &["kernel.a.b"]).unwrap_err();
    assert_eq!(err.to_string(), "Check \"kernel.a.b\" is invalid");
}
