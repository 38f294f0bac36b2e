//! Drives the section list: provision, execute, release, aggregate

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::check::{log_result, panic_message, CheckContext};
use crate::dependencies::{Dependency, DependencyProvider, SectionResources};
use crate::error::{AuditError, AuditResult};
use crate::report::aggregate_report;
use crate::section::Section;
use compliance_common::{Report, SectionRecord};

/// Runs sections one after another against a dependency provider
pub struct Orchestrator {
    sections: Vec<Section>,
    provider: DependencyProvider,
}

impl Orchestrator {
    pub fn new(sections: Vec<Section>, provider: DependencyProvider) -> Self {
        Self { sections, provider }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Run every section and collect the records of those that produced one.
    ///
    /// Resources provisioned for a section are released before the next
    /// section is provisioned, whatever happened in between.
    pub async fn run_all_sections(&self) -> Vec<SectionRecord> {
        let config = self.provider.config().clone();
        let mut records = Vec::new();

        for section in &self.sections {
            if section.skip(&config) {
                tracing::debug!(section = section.name(), "Section {} SKIPPED", section.name());
                continue;
            }

            let mut resources = SectionResources::default();
            let keys = section.requirements();

            tracing::info!(section = section.name(), "Setting up {} section...", section.name());
            let record = match self.provision(&keys, &mut resources).await {
                Ok(()) => {
                    let ctx = CheckContext::new(&config, &resources);
                    section.generate_report(&ctx).await
                }
                Err(e) => {
                    tracing::debug!(section = section.name(), "Provisioning failed: {:?}", e);
                    tracing::error!(section = section.name(), "Provisioning failed: {}", e);
                    log_result(&format!("Section {}", section.name()), false);
                    Some(section.failed_report(format!(
                        "Failed to provision resources for section {}",
                        section.name()
                    )))
                }
            };

            resources.release().await;

            if let Some(record) = record {
                records.push(record);
            }
        }

        records
    }

    /// Provision `keys`, turning a panic in the cluster layer into an error
    /// so that the partial resources still get released
    async fn provision(
        &self,
        keys: &BTreeSet<Dependency>,
        resources: &mut SectionResources,
    ) -> AuditResult<()> {
        AssertUnwindSafe(self.provider.provision(keys, resources))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(AuditError::Provisioning(panic_message(panic.as_ref()))))
    }

    /// Run all sections and fold them into the final report
    pub async fn generate_report(&self) -> Report {
        let sections = self.run_all_sections().await;
        aggregate_report(sections)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sections", &self.sections)
            .finish_non_exhaustive()
    }
}
