//! Check-orchestration engine for the cluster compliance checker
//!
//! Provides:
//! - Section and check registries with per-section independent check lists
//! - Ephemeral cluster resource lifecycle (secrets, services, probe workloads)
//! - Bounded readiness polling
//! - Section-scoped dependency provisioning
//! - Report aggregation with deduplicated faults
//! - The catalog of compliance checks run against a Kubernetes cluster

pub mod check;
pub mod checks;
pub mod config;
pub mod dependencies;
pub mod discovery;
pub mod error;
pub mod fakes;
pub mod kubernetes;
pub mod orchestrator;
pub mod poll;
pub mod report;
pub mod requirements;
pub mod section;
pub mod spawner;
pub mod util;

pub use check::{Check, CheckContext, CheckDefinition};
pub use config::{AuditConfig, RegistryCredentials};
pub use dependencies::{Dependency, DependencyProvider, SectionResources};
pub use error::{AuditError, AuditResult};
pub use orchestrator::Orchestrator;
pub use section::Section;
pub use spawner::Spawner;

pub use compliance_common::{CheckOutcome, CheckRecord, Report, SectionRecord};
