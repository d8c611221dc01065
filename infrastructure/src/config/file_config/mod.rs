//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! Every section converts into its application counterpart and reports the
//! problems it found along the way.

mod docker;
mod errors;
mod logging;
mod monitor;
mod output;
mod resources;
mod sandbox;
mod scheduler;
mod volumes;

pub use docker::FileDockerConfig;
pub use errors::FileErrorsConfig;
pub use logging::FileLoggingConfig;
pub use monitor::FileMonitorConfig;
pub use output::FileOutputConfig;
pub use resources::FileResourcesConfig;
pub use sandbox::FileSandboxConfig;
pub use scheduler::FileSchedulerConfig;
pub use volumes::FileVolumesConfig;

use serde::{Deserialize, Serialize};
use toolcell_application::EngineConfig;
use toolcell_domain::ConfigIssue;

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub scheduler: FileSchedulerConfig,
    pub resources: FileResourcesConfig,
    pub sandbox: FileSandboxConfig,
    pub monitor: FileMonitorConfig,
    pub volumes: FileVolumesConfig,
    pub errors: FileErrorsConfig,
    pub docker: FileDockerConfig,
    pub logging: FileLoggingConfig,
    pub output: FileOutputConfig,
}

impl FileConfig {
    /// Validate the entire configuration, returning all detected issues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        self.to_engine_config().1
    }

    /// Convert into engine settings.
    ///
    /// Invalid fields are replaced by their defaults and reported; callers
    /// should refuse to start when any returned issue is an error.
    pub fn to_engine_config(&self) -> (EngineConfig, Vec<ConfigIssue>) {
        let mut issues = Vec::new();

        let (scheduler, i) = self.scheduler.to_scheduler_config();
        issues.extend(i);
        let (resources, i) = self.resources.to_resource_config();
        issues.extend(i);
        let (sandbox, i) = self.sandbox.to_sandbox_config();
        issues.extend(i);
        let (monitor, i) = self.monitor.to_monitor_config();
        issues.extend(i);
        let (errors, i) = self.errors.to_ledger_config();
        issues.extend(i);

        let config = EngineConfig {
            scheduler,
            resources,
            sandbox,
            monitor,
            volumes: self.volumes.to_volume_config(),
            errors,
        };
        (config, issues)
    }
}
