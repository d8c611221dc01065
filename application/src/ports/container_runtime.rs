//! Container runtime port
//!
//! Narrow interface to the host's container runtime. Orchestration code only
//! talks to this trait, so the backend (CLI subprocess, native API socket,
//! in-memory fake) can be swapped without touching it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use toolcell_domain::ContainerStats;

/// Errors reported by a runtime backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("runtime command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("unexpected runtime output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }
}

/// Where a mount comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum MountSource {
    HostPath(PathBuf),
    Volume(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub source: MountSource,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn host(path: impl Into<PathBuf>, target: impl Into<String>, read_only: bool) -> Self {
        Self {
            source: MountSource::HostPath(path.into()),
            target: target.into(),
            read_only,
        }
    }

    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Volume(name.into()),
            target: target.into(),
            read_only: false,
        }
    }
}

/// Device I/O throttle.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceThrottle {
    pub device: String,
    pub read_rate: String,
    pub write_rate: String,
}

/// Isolation settings for one sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Hardening {
    pub read_only_root: bool,
    pub drop_all_capabilities: bool,
    /// Re-added after dropping all
    pub add_capabilities: Vec<String>,
    pub no_new_privileges: bool,
    pub pids_limit: u32,
    pub nofile_limit: u64,
    pub nproc_limit: u64,
    /// Size of the `/tmp` tmpfs in MB
    pub tmpfs_size_mb: u64,
    pub io_throttle: Option<DeviceThrottle>,
    pub user: Option<String>,
    /// Daemon-side cap on the retained container log, in bytes
    pub log_max_bytes: Option<u64>,
}

impl Default for Hardening {
    fn default() -> Self {
        Self {
            read_only_root: true,
            drop_all_capabilities: true,
            add_capabilities: Vec::new(),
            no_new_privileges: true,
            pids_limit: 100,
            nofile_limit: 1024,
            nproc_limit: 256,
            tmpfs_size_mb: 64,
            io_throttle: None,
            user: None,
            log_max_bytes: None,
        }
    }
}

/// Everything needed to start one sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub workdir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    /// Memory cap in MB; `None` leaves the runtime default
    pub memory_mb: Option<f64>,
    /// CPU cap in cores; `None` leaves the runtime default
    pub cpus: Option<f64>,
    pub network: bool,
    pub hardening: Hardening,
    pub labels: BTreeMap<String, String>,
}

/// Result of inspecting a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: Option<i64>,
    /// Raw health string (`healthy`, `unhealthy`, `starting`); `None` without a probe
    pub health: Option<String>,
}

/// Captured output streams, bounded by the caller's limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeInfo {
    pub name: String,
    /// Creation time, when the runtime reports one
    pub created_at: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
}

/// Port for the container runtime.
///
/// Implementations (adapters) live in the infrastructure layer.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Backend name for logs (e.g. `"docker"`)
    fn backend_name(&self) -> &str;

    /// Check that the runtime is reachable; returns its version string.
    async fn ping(&self) -> Result<String, RuntimeError>;

    /// Start a detached container; returns its instance ID.
    async fn launch(&self, spec: &LaunchSpec) -> Result<String, RuntimeError>;

    /// Wait for the container to exit; returns its exit code.
    async fn wait(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Fails with [`RuntimeError::NotFound`] when the container does not exist.
    async fn inspect(&self, id: &str) -> Result<ContainerState, RuntimeError>;

    async fn stats(&self, id: &str) -> Result<ContainerStats, RuntimeError>;

    async fn logs(&self, id: &str, max_bytes: usize) -> Result<CapturedOutput, RuntimeError>;

    async fn kill(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;

    // ==================== Volumes ====================

    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<(), RuntimeError>;

    /// Names of volumes starting with `prefix`.
    async fn list_volumes(&self, prefix: &str) -> Result<Vec<String>, RuntimeError>;

    /// Fails with [`RuntimeError::NotFound`] when the volume does not exist.
    async fn inspect_volume(&self, name: &str) -> Result<VolumeInfo, RuntimeError>;

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError>;

    /// Copy the contents of a host directory into the root of a volume.
    async fn copy_into_volume(&self, volume: &str, src_dir: &Path) -> Result<(), RuntimeError>;

    /// Copy the contents of a volume into a host directory.
    async fn copy_from_volume(&self, volume: &str, dest_dir: &Path) -> Result<(), RuntimeError>;
}
