//! Orchestrator Tests
//! End-to-end runs of sections against the in-memory cluster: aggregation,
//! provisioning failures, and resource teardown ordering

mod common;

use std::sync::atomic::Ordering;

use common::{
    create_test_cluster, create_test_config, create_test_provider, PanickingCheck, StaticCheck,
};
use compliance_engine::config::{AuditConfig, DEFAULT_REGISTRY_SECRET};
use compliance_engine::{Dependency, Orchestrator, Section};

const SINGLE_POD: &[Dependency] = &[Dependency::SinglePod];

// ============== Aggregation Tests ==============

#[tokio::test]
async fn test_foo_bar_report() {
    let cluster = create_test_cluster(1);
    let (provider, _) = create_test_provider(&cluster, create_test_config());

    let foo = Section::new("foo", "Foo", "Foo section")
        .with_check(StaticCheck::new("first", true, "1337", "> 1000"))
        .with_check(StaticCheck::new("second", true, "13370", "< 20000"));
    let bar = Section::new("bar", "Bar", "Bar section")
        .with_check(StaticCheck::new("third", false, "1337", "> 9000"))
        .with_check(StaticCheck::new("fourth", true, "true", "true"));

    let report = Orchestrator::new(vec![foo, bar], provider).generate_report().await;

    assert!(!report.result);
    assert_eq!(report.sections.len(), 2);
    assert_eq!(report.sections[0].name, "Foo");
    assert!(report.sections[0].result);
    assert_eq!(report.sections[1].name, "Bar");
    assert!(!report.sections[1].result);
    assert!(report.faults.is_empty());
}

#[tokio::test]
async fn test_zero_sections_pass() {
    let cluster = create_test_cluster(0);
    let (provider, connector) = create_test_provider(&cluster, create_test_config());

    let report = Orchestrator::new(Vec::new(), provider).generate_report().await;

    assert!(report.result);
    assert!(report.sections.is_empty());
    assert!(report.faults.is_empty());
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn test_skipped_section_is_not_provisioned() {
    let cluster = create_test_cluster(1);
    let (provider, connector) = create_test_provider(&cluster, create_test_config());

    let skipped = Section::new("foo", "Foo", "")
        .skip_when(|_| true)
        .with_check(StaticCheck::new("first", true, "1", "1").requiring(SINGLE_POD));

    let report = Orchestrator::new(vec![skipped], provider).generate_report().await;

    assert!(report.sections.is_empty());
    assert_eq!(connector.connects(), 0);
    assert!(cluster.journal().is_empty());
}

// ============== Provisioning Tests ==============

#[tokio::test]
async fn test_provisioning_failure_is_a_single_fault() {
    let cluster = create_test_cluster(1);
    // No registry credentials and no existing secret
    let (provider, _) = create_test_provider(&cluster, AuditConfig::default());

    let check = StaticCheck::new("first", true, "1", "1").requiring(SINGLE_POD);
    let runs = check.counter();
    let section = Section::new("foo", "Foo", "").with_check(check);

    let report = Orchestrator::new(vec![section], provider).generate_report().await;

    assert!(!report.result);
    let foo = &report.sections[0];
    assert!(!foo.result);
    assert!(foo.records.is_empty());
    assert_eq!(foo.faults, vec!["Failed to provision resources for section Foo"]);
    assert_eq!(report.faults, foo.faults);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_section_does_not_stop_the_run() {
    let cluster = create_test_cluster(1);
    cluster.fail_on("create_stateful_set");
    let (provider, _) = create_test_provider(&cluster, create_test_config());

    let broken = Section::new("foo", "Foo", "")
        .with_check(StaticCheck::new("first", true, "1", "1").requiring(SINGLE_POD));
    let healthy = Section::new("bar", "Bar", "").with_check(StaticCheck::new("second", true, "1", "1"));

    let report = Orchestrator::new(vec![broken, healthy], provider).generate_report().await;

    assert_eq!(report.sections.len(), 2);
    assert!(!report.sections[0].result);
    assert!(report.sections[1].result);
    // The secret created before the failure is gone again
    assert!(!cluster.has_secret("default", DEFAULT_REGISTRY_SECRET));
}

#[tokio::test]
async fn test_panic_during_provisioning_is_contained() {
    let cluster = create_test_cluster(1);
    cluster.panic_on("create_stateful_set");
    let (provider, _) = create_test_provider(&cluster, create_test_config());

    let broken = Section::new("foo", "Foo", "")
        .with_check(StaticCheck::new("first", true, "1", "1").requiring(SINGLE_POD));
    let healthy = Section::new("bar", "Bar", "").with_check(StaticCheck::new("second", true, "1", "1"));

    let report = Orchestrator::new(vec![broken, healthy], provider).generate_report().await;

    assert_eq!(report.sections.len(), 2);
    assert_eq!(
        report.sections[0].faults,
        vec!["Failed to provision resources for section Foo"]
    );
    assert!(report.sections[1].result);
    // The secret created before the panic was released
    assert!(!cluster.has_secret("default", DEFAULT_REGISTRY_SECRET));
    assert_eq!(cluster.live_objects(), 0);
}

// ============== Teardown Tests ==============

#[tokio::test]
async fn test_release_precedes_next_provisioning() {
    let cluster = create_test_cluster(1);
    let (provider, connector) = create_test_provider(&cluster, create_test_config());

    let sections = vec![
        Section::new("foo", "Foo", "")
            .with_check(StaticCheck::new("first", true, "1", "1").requiring(SINGLE_POD)),
        Section::new("bar", "Bar", "")
            .with_check(StaticCheck::new("second", true, "1", "1").requiring(SINGLE_POD)),
    ];
    Orchestrator::new(sections, provider).generate_report().await;

    let one_section = [
        "connect",
        "create_secret default/piwik-pro-registry",
        "create_stateful_set default/single-pod",
        "delete_stateful_set default/single-pod",
        "delete_secret default/piwik-pro-registry",
    ];
    let expected: Vec<String> = one_section
        .iter()
        .chain(one_section.iter())
        .map(|entry| entry.to_string())
        .collect();

    assert_eq!(cluster.journal(), expected);
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_release_after_panicking_check() {
    let cluster = create_test_cluster(2);
    let (provider, _) = create_test_provider(&cluster, create_test_config());

    let section = Section::new("foo", "Foo", "")
        .with_check(PanickingCheck { requires: SINGLE_POD })
        .with_check(StaticCheck::new("after", true, "1", "1"));

    let report = Orchestrator::new(vec![section], provider).generate_report().await;

    let foo = &report.sections[0];
    assert!(!foo.result);
    assert_eq!(foo.records.len(), 2);
    assert_eq!(foo.records[0].outcome.measured, "Internal error");
    assert!(foo.records[1].outcome.result);

    assert_eq!(cluster.live_objects(), 0);
    assert!(!cluster.has_secret("default", DEFAULT_REGISTRY_SECRET));
}

#[tokio::test]
async fn test_existing_secret_is_kept() {
    let cluster = create_test_cluster(1);
    cluster.add_secret("default", DEFAULT_REGISTRY_SECRET);
    // Credentials are not needed when the secret already exists
    let (provider, _) = create_test_provider(&cluster, AuditConfig::default());

    let section = Section::new("foo", "Foo", "")
        .with_check(StaticCheck::new("first", true, "1", "1").requiring(SINGLE_POD));

    let report = Orchestrator::new(vec![section], provider).generate_report().await;

    assert!(report.result);
    assert!(cluster.has_secret("default", DEFAULT_REGISTRY_SECRET));
    assert!(!cluster
        .journal()
        .iter()
        .any(|entry| entry.contains("secret")));
}

#[tokio::test]
async fn test_created_secret_is_deleted() {
    let cluster = create_test_cluster(0);
    let (provider, _) = create_test_provider(&cluster, create_test_config());

    let section = Section::new("foo", "Foo", "").with_check(
        StaticCheck::new("first", true, "1", "1").requiring(&[Dependency::RegistrySecret]),
    );

    Orchestrator::new(vec![section], provider).generate_report().await;

    assert!(!cluster.has_secret("default", DEFAULT_REGISTRY_SECRET));
    assert_eq!(
        cluster.journal(),
        vec![
            "connect",
            "create_secret default/piwik-pro-registry",
            "delete_secret default/piwik-pro-registry"
        ]
    );
}
