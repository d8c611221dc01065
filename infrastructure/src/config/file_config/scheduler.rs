//! Scheduler configuration from TOML (`[scheduler]` section)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use toolcell_application::SchedulerConfig;
use toolcell_domain::{ConfigIssue, ConfigIssueCode};

/// # Example
///
/// ```toml
/// [scheduler]
/// max_concurrent_executions = 8
/// maintenance_interval_secs = 900
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSchedulerConfig {
    pub max_concurrent_executions: usize,
    pub maintenance_interval_secs: u64,
}

impl Default for FileSchedulerConfig {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            max_concurrent_executions: defaults.max_concurrent_executions,
            maintenance_interval_secs: defaults.maintenance_interval.as_secs(),
        }
    }
}

impl FileSchedulerConfig {
    pub fn to_scheduler_config(&self) -> (SchedulerConfig, Vec<ConfigIssue>) {
        let mut issues = Vec::new();
        if self.max_concurrent_executions == 0 {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::ZeroConcurrency,
                "scheduler.max_concurrent_executions",
                "must be at least 1",
            ));
        }
        if self.maintenance_interval_secs == 0 {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::ZeroInterval,
                "scheduler.maintenance_interval_secs",
                "must be greater than zero",
            ));
        }
        let config = SchedulerConfig {
            max_concurrent_executions: self.max_concurrent_executions.max(1),
            maintenance_interval: Duration::from_secs(self.maintenance_interval_secs.max(1)),
        };
        (config, issues)
    }
}
