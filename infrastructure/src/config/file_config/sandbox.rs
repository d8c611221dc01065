//! Sandbox configuration from TOML (`[sandbox]` section)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toolcell_application::{HealthGate, IoThrottle, SandboxConfig};
use toolcell_domain::{ConfigIssue, ConfigIssueCode};

/// # Example
///
/// ```toml
/// [sandbox]
/// timeout_secs = 60
/// health_gate = "always"
/// io_device = ""          # disable I/O throttling
/// user = "1000:1000"
/// allowed_capabilities = ["NET_BIND_SERVICE"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSandboxConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_root: Option<PathBuf>,
    pub name_prefix: String,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    /// `when_configured`, `always` or `never`
    pub health_gate: String,
    pub pids_limit: u32,
    pub nofile_limit: u64,
    pub nproc_limit: u64,
    pub tmpfs_size_mb: u64,
    /// Empty disables throttling
    pub io_device: String,
    pub io_read_rate: String,
    pub io_write_rate: String,
    /// Empty keeps the image's user
    pub user: String,
    pub allowed_capabilities: Vec<String>,
}

impl Default for FileSandboxConfig {
    fn default() -> Self {
        let d = SandboxConfig::default();
        let throttle = d.io_throttle.clone().unwrap_or(IoThrottle {
            device: String::new(),
            read_rate: String::new(),
            write_rate: String::new(),
        });
        Self {
            work_root: d.work_root,
            name_prefix: d.name_prefix,
            timeout_secs: d.default_timeout.as_secs(),
            max_output_bytes: d.max_output_bytes,
            health_gate: d.health_gate.as_str().to_string(),
            pids_limit: d.pids_limit,
            nofile_limit: d.nofile_limit,
            nproc_limit: d.nproc_limit,
            tmpfs_size_mb: d.tmpfs_size_mb,
            io_device: throttle.device,
            io_read_rate: throttle.read_rate,
            io_write_rate: throttle.write_rate,
            user: d.user.unwrap_or_default(),
            allowed_capabilities: d.allowed_capabilities,
        }
    }
}

impl FileSandboxConfig {
    pub fn to_sandbox_config(&self) -> (SandboxConfig, Vec<ConfigIssue>) {
        let mut issues = Vec::new();

        let health_gate = self.health_gate.parse::<HealthGate>().unwrap_or_else(|e| {
            issues.push(ConfigIssue::warning(
                ConfigIssueCode::UnknownValue,
                "sandbox.health_gate",
                format!("{}, falling back to '{}'", e, HealthGate::default().as_str()),
            ));
            HealthGate::default()
        });

        if self.timeout_secs == 0 {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::ZeroTimeout,
                "sandbox.timeout_secs",
                "a zero timeout would kill every execution",
            ));
        }

        let io_throttle = (!self.io_device.trim().is_empty()).then(|| IoThrottle {
            device: self.io_device.clone(),
            read_rate: self.io_read_rate.clone(),
            write_rate: self.io_write_rate.clone(),
        });

        let config = SandboxConfig {
            work_root: self.work_root.clone(),
            name_prefix: self.name_prefix.clone(),
            default_timeout: Duration::from_secs(self.timeout_secs.max(1)),
            max_output_bytes: self.max_output_bytes,
            health_gate,
            pids_limit: self.pids_limit,
            nofile_limit: self.nofile_limit,
            nproc_limit: self.nproc_limit,
            tmpfs_size_mb: self.tmpfs_size_mb,
            io_throttle,
            user: (!self.user.trim().is_empty()).then(|| self.user.clone()),
            allowed_capabilities: self.allowed_capabilities.clone(),
        };
        (config, issues)
    }
}
