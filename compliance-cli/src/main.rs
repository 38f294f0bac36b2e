//! Cluster Compliance Checker
//!
//! Audits a Kubernetes cluster against the product's hardware and software
//! requirements, renders the report and hosts it over HTTP.

mod logging;
mod render;
mod serve;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use compliance_common::{MaintenanceType, MonthlyTraffic, Phase, Report};
use compliance_engine::checks::catalog;
use compliance_engine::config::{
    DEFAULT_NAMESPACE, DEFAULT_REGISTRY_SECRET, DEFAULT_REGISTRY_SERVER, DEFAULT_TOOLS_IMAGE,
};
use compliance_engine::discovery::discover_sections;
use compliance_engine::kubernetes::KubeConnector;
use compliance_engine::requirements::HardwareRequirements;
use compliance_engine::{AuditConfig, DependencyProvider, Orchestrator, RegistryCredentials};
use tracing::{error, info};

use crate::logging::LoggingConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Expected monthly traffic in millions of actions (10, 50, 100, 250, 500)
    #[arg(long, env = "PP_MONTHLY_TRAFFIC", default_value = "10")]
    monthly_traffic: MonthlyTraffic,

    /// Maintenance model (remote-access, self-support)
    #[arg(long, env = "PP_MAINTENANCE_TYPE", default_value = "remote-access")]
    maintenance_type: MaintenanceType,

    /// Offline installation
    #[arg(long, env = "PP_OFFLINE")]
    offline: bool,

    /// Phase at which the checker is executed (pre-contract, pre-install)
    #[arg(long, env = "PP_PHASE", default_value = "pre-contract")]
    phase: Phase,

    /// Section "section" or check "section.CheckId" to run, repeatable.
    /// Everything runs when omitted.
    #[arg(long = "check", value_name = "SELECTOR")]
    checks: Vec<String>,

    /// Image registry url
    #[arg(long, env = "PP_REGISTRY_URL", default_value = DEFAULT_REGISTRY_SERVER)]
    registry_server: String,

    /// Image registry username
    #[arg(long, env = "PP_REGISTRY_USERNAME")]
    registry_username: Option<String>,

    /// Image registry password
    #[arg(long, env = "PP_REGISTRY_PASSWORD", hide_env_values = true)]
    registry_password: Option<String>,

    /// Image pull secret name, an existing secret is reused as is
    #[arg(long, env = "PP_REGISTRY_SECRET", default_value = DEFAULT_REGISTRY_SECRET)]
    registry_secret: String,

    /// Image of the cluster-compliance-checker tools
    #[arg(long, env = "PP_TOOLS_IMAGE", default_value = DEFAULT_TOOLS_IMAGE)]
    tools_image: String,

    /// Tag of the tools image
    #[arg(long, env = "PP_TOOLS_IMAGE_TAG", default_value = env!("CARGO_PKG_VERSION"))]
    tools_image_tag: String,

    /// Storage class for probe volumes, cluster default when empty
    #[arg(long, env = "PP_STORAGE_CLASS")]
    storage_class: Option<String>,

    /// Additional namespaces allowed in the cluster, repeatable.
    /// The environment variable takes a space separated list.
    #[arg(long, env = "PP_NAMESPACE_WHITELIST", value_delimiter = ' ')]
    namespace_whitelist: Vec<String>,

    /// Namespace probe workloads are spawned in
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Port the report server listens on
    #[arg(long, env = "PP_PORT", default_value_t = 8080)]
    port: u16,

    /// Exit after writing the report instead of serving it
    #[arg(long)]
    no_serve: bool,

    /// Directory receiving the report and logs
    #[arg(long, default_value = "report")]
    report_dir: PathBuf,

    /// Log level threshold
    #[arg(long, env = "PP_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log level threshold for the Kubernetes client
    #[arg(long, env = "PP_KUBE_LOG_LEVEL", default_value = "warn")]
    kubernetes_log_level: String,
}

impl Cli {
    fn audit_config(&self) -> AuditConfig {
        AuditConfig {
            offline: self.offline,
            monthly_traffic: self.monthly_traffic,
            maintenance_type: self.maintenance_type,
            phase: self.phase,
            requirements: HardwareRequirements::for_traffic(self.monthly_traffic),
            registry: RegistryCredentials {
                server: self.registry_server.clone(),
                username: self.registry_username.clone(),
                password: self.registry_password.clone(),
                secret_name: self.registry_secret.clone(),
            },
            tools_image: format!("{}:{}", self.tools_image, self.tools_image_tag),
            storage_class: self
                .storage_class
                .clone()
                .filter(|class| !class.trim().is_empty()),
            namespace_allowlist: self
                .namespace_whitelist
                .iter()
                .filter(|namespace| !namespace.is_empty())
                .cloned()
                .collect(),
            namespace: self.namespace.clone(),
        }
    }

    fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            kubernetes_level: self.kubernetes_log_level.clone(),
            directory: Some(self.report_dir.clone()),
        }
    }
}

async fn audit(cli: &Cli) -> anyhow::Result<Report> {
    let config = cli.audit_config();
    info!(
        monthly_traffic = %config.monthly_traffic,
        maintenance_type = %config.maintenance_type,
        phase = %config.phase,
        offline = config.offline,
        "Starting compliance audit"
    );

    let sections = discover_sections(&catalog(), &cli.checks)?;
    let provider = DependencyProvider::new(Arc::new(config), Arc::new(KubeConnector::new()));
    Ok(Orchestrator::new(sections, provider).generate_report().await)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    fs::create_dir_all(&cli.report_dir)
        .with_context(|| format!("failed to create {}", cli.report_dir.display()))?;
    let _guard = cli.logging().init()?;

    let passed = match audit(&cli).await {
        Ok(report) => {
            let path = render::write_report(&cli.report_dir, &report)
                .with_context(|| format!("failed to write report to {}", cli.report_dir.display()))?;
            info!(
                "Report {} written to {}",
                if report.result { "PASSED" } else { "FAILED" },
                path.display()
            );
            report.result
        }
        Err(e) => {
            error!("Audit failed: {:#}", e);
            render::write_error_page(&cli.report_dir).with_context(|| {
                format!("failed to write error page to {}", cli.report_dir.display())
            })?;
            false
        }
    };

    if cli.no_serve {
        return Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    serve::serve(&cli.report_dir, cli.port).await?;
    Ok(ExitCode::SUCCESS)
}
