//! Audit run configuration
//!
//! Built once by the CLI from flags and environment variables and handed to
//! the dependency provider. Checks only ever read it.

use crate::requirements::HardwareRequirements;
use compliance_common::{MaintenanceType, MonthlyTraffic, Phase};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REGISTRY_SERVER: &str = "piwikpro.azurecr.io";
pub const DEFAULT_TOOLS_IMAGE: &str = "ghcr.io/piwikpro/cluster-compliance-checker-tools";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_REGISTRY_SECRET: &str = "piwik-pro-registry";

/// Image registry credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub server: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Image pull secret probe workloads use, reused when it already exists
    pub secret_name: String,
}

impl RegistryCredentials {
    /// Docker config document for an image pull secret, `None` when no
    /// credentials were given
    pub fn docker_config_json(&self) -> Option<String> {
        if self.username.is_none() && self.password.is_none() {
            return None;
        }

        let mut auths = serde_json::Map::new();
        auths.insert(
            self.server.clone(),
            serde_json::json!({
                "username": self.username,
                "password": self.password,
            }),
        );
        Some(serde_json::json!({ "auths": auths }).to_string())
    }
}

impl Default for RegistryCredentials {
    fn default() -> Self {
        Self {
            server: DEFAULT_REGISTRY_SERVER.to_string(),
            username: None,
            password: None,
            secret_name: DEFAULT_REGISTRY_SECRET.to_string(),
        }
    }
}

/// Configuration of a single audit run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Offline installation (no outbound internet access expected)
    pub offline: bool,
    pub monthly_traffic: MonthlyTraffic,
    pub maintenance_type: MaintenanceType,
    pub phase: Phase,
    /// Hardware requirements for the configured traffic tier
    pub requirements: HardwareRequirements,
    pub registry: RegistryCredentials,
    /// Fully qualified probe image (`image:tag`)
    pub tools_image: String,
    /// Storage class for probe volumes, cluster default when unset
    pub storage_class: Option<String>,
    /// Namespaces allowed in addition to the system ones
    pub namespace_allowlist: Vec<String>,
    /// Namespace probe workloads are spawned in
    pub namespace: String,
}

impl AuditConfig {
    /// Configuration for a traffic tier with every other option defaulted
    pub fn for_traffic(monthly_traffic: MonthlyTraffic) -> Self {
        Self {
            monthly_traffic,
            requirements: HardwareRequirements::for_traffic(monthly_traffic),
            ..Default::default()
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            offline: false,
            monthly_traffic: MonthlyTraffic::default(),
            maintenance_type: MaintenanceType::default(),
            phase: Phase::default(),
            requirements: HardwareRequirements::for_traffic(MonthlyTraffic::default()),
            registry: RegistryCredentials::default(),
            tools_image: format!("{}:{}", DEFAULT_TOOLS_IMAGE, env!("CARGO_PKG_VERSION")),
            storage_class: None,
            namespace_allowlist: Vec::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}
