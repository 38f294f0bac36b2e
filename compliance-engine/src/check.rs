//! Single compliance check and its execution wrapper

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::config::AuditConfig;
use crate::dependencies::{Dependency, ProbeWorkload, SectionResources};
use crate::error::{AuditError, AuditResult};
use crate::kubernetes::ClusterApi;
use compliance_common::{CheckOutcome, CheckRecord};

/// A named unit of work producing a pass/fail outcome
///
/// `Ok(None)` means the check does not apply and is skipped. An `Err` is
/// turned into an internal error outcome by `CheckDefinition`.
#[async_trait]
pub trait Check: Send + Sync {
    /// Stable identifier used by `section.check` selectors
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Resources the check expects its section to provision
    fn requires(&self) -> &[Dependency] {
        &[]
    }

    async fn perform_check(&self, ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>>;
}

/// Build an outcome carrying a major problem and log it
pub fn major_problem(check: &dyn Check, problem: impl Into<String>) -> CheckOutcome {
    let problem = problem.into();
    tracing::error!(check = check.name(), "Check encountered an error: {}", problem);
    CheckOutcome::fault(problem)
}

/// What a check can see while it runs
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    config: &'a AuditConfig,
    resources: &'a SectionResources,
}

impl<'a> CheckContext<'a> {
    pub fn new(config: &'a AuditConfig, resources: &'a SectionResources) -> Self {
        Self { config, resources }
    }

    pub fn config(&self) -> &'a AuditConfig {
        self.config
    }

    pub fn cluster(&self) -> AuditResult<&'a Arc<dyn ClusterApi>> {
        self.resources
            .cluster
            .as_ref()
            .ok_or_else(|| AuditError::NotProvisioned(Dependency::Cluster.to_string()))
    }

    /// Name of the image pull secret
    pub fn registry_secret(&self) -> AuditResult<&'a str> {
        self.resources
            .registry_secret
            .as_deref()
            .ok_or_else(|| AuditError::NotProvisioned(Dependency::RegistrySecret.to_string()))
    }

    pub fn workload(&self, dependency: Dependency) -> AuditResult<&'a ProbeWorkload> {
        self.resources
            .workloads
            .get(&dependency)
            .ok_or_else(|| AuditError::NotProvisioned(dependency.to_string()))
    }
}

/// A check registered in a section
#[derive(Clone)]
pub struct CheckDefinition {
    check: Arc<dyn Check>,
}

impl CheckDefinition {
    pub fn new(check: impl Check + 'static) -> Self {
        Self {
            check: Arc::new(check),
        }
    }

    pub fn id(&self) -> &str {
        self.check.id()
    }

    pub fn name(&self) -> &str {
        self.check.name()
    }

    pub fn description(&self) -> &str {
        self.check.description()
    }

    pub fn requires(&self) -> &[Dependency] {
        self.check.requires()
    }

    /// Run the check and wrap its outcome into a record.
    ///
    /// Returns `None` when the check was skipped. Errors and panics inside
    /// the check become an internal error outcome.
    pub async fn generate_report(&self, ctx: &CheckContext<'_>) -> Option<CheckRecord> {
        let name = self.name();
        tracing::debug!(check = name, "Running check");

        let performed = AssertUnwindSafe(self.check.perform_check(ctx))
            .catch_unwind()
            .await;

        let outcome = match performed {
            Ok(Ok(Some(outcome))) => outcome,
            Ok(Ok(None)) => {
                tracing::debug!(check = name, "Check {} SKIPPED", name);
                return None;
            }
            Ok(Err(e)) => {
                tracing::debug!(check = name, "{:?}", e);
                tracing::error!(check = name, "Check {} encountered an unexpected error: {:#}", name, e);
                CheckOutcome::internal_error()
            }
            Err(panic) => {
                tracing::error!(
                    check = name,
                    "Check {} encountered an unexpected error: {}",
                    name,
                    panic_message(panic.as_ref())
                );
                CheckOutcome::internal_error()
            }
        };

        tracing::debug!(check = name, ?outcome, "Check report");
        log_result(&format!("Check {}", name), outcome.result);

        Some(CheckRecord {
            name: name.to_string(),
            description: self.description().to_string(),
            outcome,
        })
    }
}

impl std::fmt::Debug for CheckDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckDefinition")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

pub(crate) fn log_result(subject: &str, passed: bool) {
    if passed {
        tracing::info!("{} PASSED", subject);
    } else {
        tracing::info!("{} FAILED", subject);
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<CheckOutcome>);

    #[async_trait]
    impl Check for Fixed {
        fn id(&self) -> &str {
            "fixed"
        }
        fn name(&self) -> &str {
            "Fixed"
        }
        fn description(&self) -> &str {
            "Returns a fixed outcome"
        }
        async fn perform_check(&self, _ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl Check for Failing {
        fn id(&self) -> &str {
            "failing"
        }
        fn name(&self) -> &str {
            "Failing"
        }
        fn description(&self) -> &str {
            "Always errors"
        }
        async fn perform_check(&self, _ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
            anyhow::bail!("connection refused")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Check for Panicking {
        fn id(&self) -> &str {
            "panicking"
        }
        fn name(&self) -> &str {
            "Panicking"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        async fn perform_check(&self, _ctx: &CheckContext<'_>) -> anyhow::Result<Option<CheckOutcome>> {
            panic!("index out of bounds")
        }
    }

    async fn run(check: impl Check + 'static) -> Option<CheckRecord> {
        let config = AuditConfig::default();
        let resources = SectionResources::default();
        let ctx = CheckContext::new(&config, &resources);
        CheckDefinition::new(check).generate_report(&ctx).await
    }

    #[tokio::test]
    async fn test_passing_check_record() {
        let record = run(Fixed(Some(CheckOutcome::new(true, "4", "4"))))
            .await
            .unwrap();
        assert_eq!(record.name, "Fixed");
        assert_eq!(record.description, "Returns a fixed outcome");
        assert!(record.outcome.result);
    }

    #[tokio::test]
    async fn test_skipped_check_has_no_record() {
        assert!(run(Fixed(None)).await.is_none());
    }

    #[tokio::test]
    async fn test_error_becomes_internal_error() {
        let record = run(Failing).await.unwrap();
        assert_eq!(record.outcome, CheckOutcome::internal_error());
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let record = run(Panicking).await.unwrap();
        assert!(!record.outcome.result);
        assert_eq!(record.outcome.measured, "Internal error");
        assert_eq!(record.outcome.expected, "Unknown");
        assert_eq!(record.outcome.fault, None);
    }

    #[test]
    fn test_context_reports_missing_resources() {
        let config = AuditConfig::default();
        let resources = SectionResources::default();
        let ctx = CheckContext::new(&config, &resources);

        assert!(matches!(ctx.cluster(), Err(AuditError::NotProvisioned(_))));
        assert!(matches!(
            ctx.workload(Dependency::SinglePod),
            Err(AuditError::NotProvisioned(_))
        ));
    }
}
