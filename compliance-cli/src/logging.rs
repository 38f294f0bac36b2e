//! Logging configuration
//!
//! Console output for the operator and a plain-text copy of the same events
//! in the report directory, served later under `/logs`.

use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_NAME: &str = "logs.txt";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// Threshold for the `kube` client targets
    pub kubernetes_level: String,
    /// Directory receiving the log file, console only when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            kubernetes_level: "warn".to_string(),
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Filter directives used when `RUST_LOG` is not set
    pub fn directives(&self) -> String {
        format!(
            "{level},kube={kube},kube_client={kube},kube_runtime={kube}",
            level = self.level,
            kube = self.kubernetes_level
        )
    }

    /// Initialize logging. The returned guard flushes the log file on drop
    /// and must live until the end of the run.
    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let env_filter =
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(self.directives()))?;

        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_writer(io::stdout);

        let Some(directory) = &self.directory else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init()?;
            return Ok(None);
        };

        let (writer, guard) = non_blocking(rolling::never(directory, LOG_FILE_NAME));
        let file_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .with_writer(writer);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        tracing::debug!("Logging initialized - level: {}", self.level);
        Ok(Some(guard))
    }
}

/// Location of the log file inside a report directory
pub fn log_file(directory: &Path) -> PathBuf {
    directory.join(LOG_FILE_NAME)
}
