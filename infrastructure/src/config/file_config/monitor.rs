//! Monitor configuration from TOML (`[monitor]` section)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use toolcell_application::MonitorConfig;
use toolcell_domain::{ConfigIssue, ConfigIssueCode, MonitorThresholds};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMonitorConfig {
    pub poll_interval_ms: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub max_processes: u64,
    pub retain_stopped_secs: u64,
}

impl Default for FileMonitorConfig {
    fn default() -> Self {
        let d = MonitorConfig::default();
        Self {
            poll_interval_ms: d.poll_interval.as_millis() as u64,
            cpu_percent: d.thresholds.cpu_percent,
            memory_percent: d.thresholds.memory_percent,
            max_processes: d.thresholds.processes,
            retain_stopped_secs: d.retain_stopped.as_secs(),
        }
    }
}

impl FileMonitorConfig {
    pub fn to_monitor_config(&self) -> (MonitorConfig, Vec<ConfigIssue>) {
        let mut issues = Vec::new();
        let defaults = MonitorThresholds::default();

        if self.poll_interval_ms == 0 {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::ZeroInterval,
                "monitor.poll_interval_ms",
                "must be greater than zero",
            ));
        }

        let mut percent = |key: &str, value: f64, fallback: f64| {
            if value > 0.0 && value <= 100.0 {
                value
            } else {
                issues.push(ConfigIssue::error(
                    ConfigIssueCode::ThresholdOutOfRange,
                    key,
                    format!("{} is outside (0, 100]", value),
                ));
                fallback
            }
        };
        let cpu_percent = percent("monitor.cpu_percent", self.cpu_percent, defaults.cpu_percent);
        let memory_percent = percent("monitor.memory_percent", self.memory_percent, defaults.memory_percent);

        let config = MonitorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            thresholds: MonitorThresholds {
                cpu_percent,
                memory_percent,
                processes: self.max_processes,
            },
            retain_stopped: Duration::from_secs(self.retain_stopped_secs),
        };
        (config, issues)
    }
}
