//! Engine configuration container.
//!
//! [`EngineConfig`] groups the per-service sections. Services receive only
//! the section they need; [`ToolSystem`](crate::use_cases::tool_system::ToolSystem)
//! holds the whole container to wire them together.

use std::path::PathBuf;
use std::time::Duration;

use toolcell_domain::{MonitorThresholds, ResourceAmounts};

use super::HealthGate;

/// Default memory capacity in MB.
pub const DEFAULT_MEMORY_MB: f64 = 8192.0;
/// Default storage capacity in MB.
pub const DEFAULT_STORAGE_MB: f64 = 20480.0;
/// Default network capacity in MB/s.
pub const DEFAULT_NETWORK_MBPS: f64 = 1000.0;

/// Full engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub resources: ResourceConfig,
    pub sandbox: SandboxConfig,
    pub monitor: MonitorConfig,
    pub volumes: VolumeConfig,
    pub errors: ErrorLedgerConfig,
}

/// Admission loop settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Hard ceiling on simultaneously running executions
    pub max_concurrent_executions: usize,
    /// Period of the volume garbage-collection pass
    pub maintenance_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 5,
            maintenance_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Host capacity and admission margin.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub capacity: ResourceAmounts,
    /// Fraction of each pool that is never allocated
    pub reservation_margin: f64,
}

impl ResourceConfig {
    /// CPU capacity defaults to the host's available parallelism.
    pub fn host_cpu_count() -> f64 {
        std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(1.0)
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            capacity: ResourceAmounts::new(
                Self::host_cpu_count(),
                DEFAULT_MEMORY_MB,
                DEFAULT_STORAGE_MB,
                DEFAULT_NETWORK_MBPS,
            ),
            reservation_margin: 0.2,
        }
    }
}

/// Block-device I/O throttling applied to every sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct IoThrottle {
    pub device: String,
    /// Rate in the runtime's notation, e.g. `"10mb"`
    pub read_rate: String,
    pub write_rate: String,
}

/// Sandbox lifecycle and hardening settings.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Parent of per-execution working directories (system temp dir when unset)
    pub work_root: Option<PathBuf>,
    /// Prefix of container names
    pub name_prefix: String,
    /// Wall-clock limit for tools that do not declare one
    pub default_timeout: Duration,
    /// Bound on captured stdout/stderr, each
    pub max_output_bytes: usize,
    pub health_gate: HealthGate,
    pub pids_limit: u32,
    pub nofile_limit: u64,
    pub nproc_limit: u64,
    pub tmpfs_size_mb: u64,
    pub io_throttle: Option<IoThrottle>,
    /// `uid:gid` the tool runs as; `None` keeps the image default
    pub user: Option<String>,
    /// Capabilities a tool may re-add after all are dropped
    pub allowed_capabilities: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            work_root: None,
            name_prefix: "toolcell".to_string(),
            default_timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
            health_gate: HealthGate::default(),
            pids_limit: 100,
            nofile_limit: 1024,
            nproc_limit: 256,
            tmpfs_size_mb: 64,
            io_throttle: Some(IoThrottle {
                device: "/dev/sda".to_string(),
                read_rate: "10mb".to_string(),
                write_rate: "10mb".to_string(),
            }),
            user: Some("65534:65534".to_string()),
            allowed_capabilities: Vec::new(),
        }
    }
}

/// Container monitoring settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub thresholds: MonitorThresholds,
    /// How long stopped instances are kept for postmortem queries
    pub retain_stopped: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            thresholds: MonitorThresholds::default(),
            retain_stopped: Duration::from_secs(60 * 60),
        }
    }
}

/// Persistent volume settings.
#[derive(Debug, Clone)]
pub struct VolumeConfig {
    /// Every managed volume name starts with this
    pub prefix: String,
    /// Keep per-tool volumes across executions
    pub persistent: bool,
    /// Eviction cap for `cleanup_old_volumes`
    pub max_volumes: usize,
    /// In-container mount point
    pub mount_path: String,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            prefix: "toolcell-vol".to_string(),
            persistent: true,
            max_volumes: 50,
            mount_path: "/data".to_string(),
        }
    }
}

/// Error ledger settings.
#[derive(Debug, Clone)]
pub struct ErrorLedgerConfig {
    pub capacity: usize,
    /// Circuit-breaker window for critical errors
    pub critical_ttl: Duration,
}

impl Default for ErrorLedgerConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            critical_ttl: Duration::from_secs(30 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.max_concurrent_executions, 5);
        assert_eq!(config.scheduler.maintenance_interval, Duration::from_secs(1800));
        assert_eq!(config.resources.reservation_margin, 0.2);
        assert!(config.resources.capacity.cpu >= 1.0);
        assert_eq!(config.sandbox.max_output_bytes, 1_048_576);
        assert_eq!(config.monitor.poll_interval, Duration::from_secs(1));
        assert_eq!(config.errors.capacity, 1000);
        assert_eq!(config.errors.critical_ttl, Duration::from_secs(1800));
    }
}
