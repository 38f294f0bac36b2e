//! Ordered groups of checks
//!
//! Every `Section` value owns its own list of check definitions. Deriving a
//! section copies the list, so registering on one section never shows up in
//! another.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::check::{Check, CheckContext, CheckDefinition};
use crate::config::AuditConfig;
use crate::dependencies::Dependency;
use crate::report::aggregate_section;
use compliance_common::{CheckRecord, SectionRecord};

type SkipRule = Arc<dyn Fn(&AuditConfig) -> bool + Send + Sync>;

/// Named group of related checks
#[derive(Clone)]
pub struct Section {
    id: String,
    name: String,
    description: String,
    checks: Vec<CheckDefinition>,
    skip_rule: Option<SkipRule>,
}

impl Section {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            checks: Vec::new(),
            skip_rule: None,
        }
    }

    /// New section starting from a copy of this section's checks and skip rule
    pub fn derive(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            checks: self.checks.clone(),
            skip_rule: self.skip_rule.clone(),
        }
    }

    /// Skip the whole section whenever `rule` holds for the run configuration
    pub fn skip_when(mut self, rule: impl Fn(&AuditConfig) -> bool + Send + Sync + 'static) -> Self {
        self.skip_rule = Some(Arc::new(rule));
        self
    }

    /// Append a check to this section's list
    pub fn register(&mut self, check: impl Check + 'static) -> &mut Self {
        self.checks.push(CheckDefinition::new(check));
        self
    }

    pub fn with_check(mut self, check: impl Check + 'static) -> Self {
        self.register(check);
        self
    }

    /// Keep only the checks whose id satisfies `keep`
    pub fn retain_checks(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.checks.retain(|check| keep(check.id()));
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn checks(&self) -> &[CheckDefinition] {
        &self.checks
    }

    pub fn skip(&self, config: &AuditConfig) -> bool {
        self.skip_rule.as_ref().is_some_and(|rule| rule(config))
    }

    /// Union of the dependency keys declared by the checks
    pub fn requirements(&self) -> BTreeSet<Dependency> {
        self.checks
            .iter()
            .flat_map(|check| check.requires().iter().copied())
            .collect()
    }

    /// Run every check in order, dropping skipped ones
    pub async fn run_all_checks(&self, ctx: &CheckContext<'_>) -> Vec<CheckRecord> {
        let mut records = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            if let Some(record) = check.generate_report(ctx).await {
                records.push(record);
            }
        }
        records
    }

    /// Run the section; `None` when every check was skipped
    pub async fn generate_report(&self, ctx: &CheckContext<'_>) -> Option<SectionRecord> {
        tracing::debug!(section = %self.name, "Running section");
        let records = self.run_all_checks(ctx).await;
        aggregate_section(&self.name, &self.description, records)
    }

    /// Failed record carrying a single section level fault
    pub fn failed_report(&self, fault: impl Into<String>) -> SectionRecord {
        SectionRecord {
            name: self.name.clone(),
            description: self.description.clone(),
            result: false,
            records: Vec::new(),
            faults: vec![fault.into()],
        }
    }
}

impl std::fmt::Debug for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Section")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("checks", &self.checks)
            .finish()
    }
}
