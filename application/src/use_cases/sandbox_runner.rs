//! Sandbox execution of one tool against one input.
//!
//! # Lifecycle
//!
//! ```text
//! workspace ──▶ volume ──▶ launch ──▶ monitor ──▶ wait (timeout) ──▶ results
//!     │            │          │                        │                │
//!     └────────────┴──────────┴───── cleanup (always) ─┴────────────────┘
//! ```
//!
//! 1. A scratch directory with `input/` (`input.json` + tool files) and an
//!    empty `output/`.
//! 2. If the tool declares persistent files, a volume from [`VolumeManager`].
//! 3. A hardened, resource-capped container with `input/` mounted read-only,
//!    `output/` and the volume read-write.
//! 4. Monitoring of the instance.
//! 5. A hard wall-clock timeout; on expiry the container is killed.
//! 6. On a zero exit code, the [`HealthGate`].
//! 7. `error.json` wins over `output.json`.
//! 8. Cleanup: stop monitoring, capture bounded logs, remove the container,
//!    drop the scratch directory, and remove a non-persistent volume.
//!
//! Every failure is contained in the returned [`ToolExecutionResult`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use toolcell_domain::util::sanitize_name;
use toolcell_domain::{
    ErrorCode, ExecutionError, ExecutionId, ExecutionMetadata, INPUT_FILE, ResourceAmounts, Tool,
    ToolExecutionResult,
};

use crate::config::{HealthGate, SandboxConfig};
use crate::ports::container_runtime::{
    ContainerRuntime, DeviceThrottle, Hardening, LaunchSpec, Mount, RuntimeError,
};
use crate::use_cases::container_monitor::ContainerMonitor;
use crate::use_cases::volume_manager::{AcquiredVolume, VolumeError, VolumeManager};

pub const INPUT_MOUNT: &str = "/sandbox/input";
pub const OUTPUT_MOUNT: &str = "/sandbox/output";
const OUTPUT_FILE: &str = "output.json";
const ERROR_FILE: &str = "error.json";

pub const LABEL_EXECUTION_ID: &str = "toolcell.execution-id";
pub const LABEL_TOOL_ID: &str = "toolcell.tool-id";

/// Failure inside one execution's lifecycle.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("failed to prepare working directory: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("failed to launch sandbox: {0}")]
    Launch(#[source] RuntimeError),

    #[error("execution exceeded {}s timeout", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("lost track of sandbox: {0}")]
    Runtime(#[source] RuntimeError),

    #[error("health check failed: {0}")]
    Unhealthy(String),

    #[error("{message}")]
    ToolReported { message: String, details: Option<Value> },

    #[error("{0}")]
    Failed(String),

    #[error("invalid {file}: {reason}")]
    OutputParse { file: &'static str, reason: String },
}

impl SandboxError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SandboxError::Workspace(_) | SandboxError::Failed(_) => ErrorCode::ExecutionFailed,
            SandboxError::Volume(_) => ErrorCode::VolumeError,
            SandboxError::Launch(_) => ErrorCode::ContainerLaunchFailed,
            SandboxError::Timeout(_) => ErrorCode::ExecutionTimeout,
            SandboxError::Runtime(_) => ErrorCode::RuntimeError,
            SandboxError::Unhealthy(_) => ErrorCode::HealthCheckFailed,
            SandboxError::ToolReported { .. } => ErrorCode::ToolError,
            SandboxError::OutputParse { .. } => ErrorCode::OutputParseFailed,
        }
    }

    fn into_execution_error(self) -> ExecutionError {
        let code = self.code();
        let text = self.to_string();
        match self {
            SandboxError::ToolReported { message, details } => {
                let error = ExecutionError::new(code, message);
                match details {
                    Some(details) => error.with_details(details),
                    None => error,
                }
            }
            SandboxError::Timeout(limit) => ExecutionError::new(code, text)
                .with_details(serde_json::json!({ "timeout_ms": limit.as_millis() as u64 })),
            _ => ExecutionError::new(code, text),
        }
    }
}

/// Per-dispatch inputs from the scheduler.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    /// Reserved resources; caps the container
    pub resources: ResourceAmounts,
}

/// Scratch directory of one execution.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn create(root: Option<&Path>, execution_id: &ExecutionId) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("toolcell-{}-", execution_id.short());
        builder.prefix(&prefix);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        std::fs::create_dir(dir.path().join("input"))?;
        let output = dir.path().join("output");
        std::fs::create_dir(&output)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // The sandbox user is unprivileged and must be able to write here.
            std::fs::set_permissions(&output, std::fs::Permissions::from_mode(0o777))?;
        }
        Ok(Self { dir })
    }

    fn input_dir(&self) -> PathBuf {
        self.dir.path().join("input")
    }

    fn output_dir(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    async fn write_input(&self, input: &Value, files: &BTreeMap<String, String>) -> std::io::Result<()> {
        let input_dir = self.input_dir();
        let payload = serde_json::to_vec_pretty(input).map_err(std::io::Error::other)?;
        tokio::fs::write(input_dir.join(INPUT_FILE), payload).await?;
        for (relative, content) in files {
            let target = input_dir.join(relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, content).await?;
        }
        Ok(())
    }
}

/// Resources acquired during a run that cleanup must release.
#[derive(Default)]
struct Acquired {
    instance_id: Option<String>,
    volume: Option<AcquiredVolume>,
    exit_code: Option<i64>,
}

/// What a run has created so far, kept until its cleanup has run.
#[derive(Default)]
struct Outstanding {
    instance_id: Option<String>,
    ephemeral_volume: Option<String>,
}

pub struct SandboxRunner {
    runtime: Arc<dyn ContainerRuntime>,
    volumes: Arc<VolumeManager>,
    monitor: ContainerMonitor,
    config: SandboxConfig,
    outstanding: Mutex<HashMap<ExecutionId, Outstanding>>,
}

impl SandboxRunner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        volumes: Arc<VolumeManager>,
        monitor: ContainerMonitor,
        config: SandboxConfig,
    ) -> Self {
        Self {
            runtime,
            volumes,
            monitor,
            config,
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// Remove the container and ephemeral volume of an execution whose task
    /// died before its cleanup ran. Returns `false` if nothing was left.
    pub async fn reclaim(&self, execution_id: &ExecutionId) -> bool {
        let Some(left) = self.lock_outstanding().remove(execution_id) else {
            return false;
        };
        if let Some(instance_id) = left.instance_id.as_deref() {
            self.monitor.stop_monitoring(instance_id);
            if let Err(e) = self.runtime.remove(instance_id).await {
                warn!(instance_id, error = %e, "Failed to remove sandbox of aborted execution");
            }
        }
        if let Some(volume) = left.ephemeral_volume.as_deref()
            && let Err(e) = self.volumes.remove_volume(volume).await
        {
            warn!(volume, error = %e, "Failed to remove volume of aborted execution");
        }
        warn!(execution_id = %execution_id, "Reclaimed sandbox of aborted execution");
        true
    }

    fn note(&self, execution_id: &ExecutionId, update: impl FnOnce(&mut Outstanding)) {
        update(self.lock_outstanding().entry(execution_id.clone()).or_default());
    }

    fn lock_outstanding(&self) -> MutexGuard<'_, HashMap<ExecutionId, Outstanding>> {
        self.outstanding.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `tool` against `input` and return its result.
    ///
    /// `on_launch` is called with the instance ID as soon as the container
    /// has started.
    pub async fn execute_tool<F>(
        &self,
        tool: &Tool,
        input: &Value,
        ctx: &ExecutionContext,
        on_launch: F,
    ) -> ToolExecutionResult
    where
        F: FnOnce(&str) + Send,
    {
        let started = Instant::now();
        let mut acquired = Acquired::default();

        let (outcome, captured) = match Workspace::create(self.config.work_root.as_deref(), &ctx.execution_id) {
            Ok(workspace) => {
                let outcome = self.run(tool, input, ctx, &workspace, &mut acquired, on_launch).await;
                let captured = self.cleanup(&acquired).await;
                self.lock_outstanding().remove(&ctx.execution_id);
                drop(workspace);
                (outcome, captured)
            }
            Err(e) => (Err(SandboxError::Workspace(e)), None),
        };

        let (stdout, stderr) = captured.unzip();
        let metadata = ExecutionMetadata {
            execution_id: Some(ctx.execution_id.clone()),
            instance_id: acquired.instance_id,
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code: acquired.exit_code,
            stdout,
            stderr,
        };

        match outcome {
            Ok(data) => {
                info!(
                    tool_id = tool.id(),
                    execution_id = %ctx.execution_id,
                    duration_ms = metadata.duration_ms,
                    "Execution succeeded"
                );
                ToolExecutionResult::success(data).with_metadata(metadata)
            }
            Err(error) => {
                warn!(
                    tool_id = tool.id(),
                    execution_id = %ctx.execution_id,
                    code = %error.code(),
                    "Execution failed: {}",
                    error
                );
                ToolExecutionResult::failure(error.into_execution_error()).with_metadata(metadata)
            }
        }
    }

    async fn run<F>(
        &self,
        tool: &Tool,
        input: &Value,
        ctx: &ExecutionContext,
        workspace: &Workspace,
        acquired: &mut Acquired,
        on_launch: F,
    ) -> Result<Value, SandboxError>
    where
        F: FnOnce(&str) + Send,
    {
        workspace
            .write_input(input, &tool.executable.files)
            .await
            .map_err(SandboxError::Workspace)?;

        if tool.needs_volume() {
            let volume = self
                .volumes
                .acquire_tool_volume(tool.id(), &tool.persistent_files)
                .await?;
            if !volume.persistent {
                self.note(&ctx.execution_id, |o| o.ephemeral_volume = Some(volume.name.clone()));
            }
            acquired.volume = Some(volume);
        }

        let spec = self.launch_spec(tool, ctx, workspace, acquired.volume.as_ref());
        let instance_id = self.runtime.launch(&spec).await.map_err(SandboxError::Launch)?;
        acquired.instance_id = Some(instance_id.clone());
        self.note(&ctx.execution_id, |o| o.instance_id = Some(instance_id.clone()));
        on_launch(&instance_id);
        self.monitor.start_monitoring(&instance_id, Some(tool.id()));
        debug!(tool_id = tool.id(), instance_id = %instance_id, "Sandbox launched");

        let limit = tool
            .definition
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_timeout);
        let exit_code = match tokio::time::timeout(limit, self.runtime.wait(&instance_id)).await {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => return Err(SandboxError::Runtime(e)),
            Err(_) => {
                if let Err(e) = self.runtime.kill(&instance_id).await {
                    warn!(instance_id = %instance_id, error = %e, "Failed to kill timed-out sandbox");
                }
                return Err(SandboxError::Timeout(limit));
            }
        };
        acquired.exit_code = Some(exit_code);

        let output_dir = workspace.output_dir();
        if let Some(error) = read_json(&output_dir, ERROR_FILE).await? {
            return Err(tool_reported(error));
        }

        if exit_code != 0 {
            return Err(SandboxError::Failed(format!(
                "tool exited with code {} without writing {}",
                exit_code, ERROR_FILE
            )));
        }

        self.check_health(&instance_id).await?;

        match read_json(&output_dir, OUTPUT_FILE).await? {
            Some(data) => Ok(data),
            None => Err(SandboxError::Failed(format!(
                "tool exited successfully without writing {}",
                OUTPUT_FILE
            ))),
        }
    }

    async fn check_health(&self, instance_id: &str) -> Result<(), SandboxError> {
        if self.config.health_gate == HealthGate::Never {
            return Ok(());
        }
        let state = self
            .runtime
            .inspect(instance_id)
            .await
            .map_err(|e| SandboxError::Unhealthy(format!("could not inspect sandbox: {}", e)))?;
        self.config
            .health_gate
            .check(state.health.as_deref())
            .map_err(SandboxError::Unhealthy)
    }

    /// Always runs. Returns the captured (stdout, stderr) when available.
    async fn cleanup(&self, acquired: &Acquired) -> Option<(String, String)> {
        let mut captured = None;
        if let Some(instance_id) = acquired.instance_id.as_deref() {
            self.monitor.stop_monitoring(instance_id);
            match self.runtime.logs(instance_id, self.config.max_output_bytes).await {
                Ok(out) => captured = Some((out.stdout, out.stderr)),
                Err(e) => debug!(instance_id, error = %e, "Could not capture sandbox output"),
            }
            if let Err(e) = self.runtime.remove(instance_id).await {
                warn!(instance_id, error = %e, "Failed to remove sandbox");
            }
        }
        if let Some(volume) = acquired.volume.as_ref()
            && !volume.persistent
            && let Err(e) = self.volumes.remove_volume(&volume.name).await
        {
            warn!(volume = %volume.name, error = %e, "Failed to remove execution volume");
        }
        captured
    }

    fn launch_spec(
        &self,
        tool: &Tool,
        ctx: &ExecutionContext,
        workspace: &Workspace,
        volume: Option<&AcquiredVolume>,
    ) -> LaunchSpec {
        let def = &tool.definition;

        let mut env = BTreeMap::new();
        for name in &def.environment {
            if let Ok(value) = std::env::var(name) {
                env.insert(name.clone(), value);
            }
        }
        env.extend(tool.executable.env.clone());
        env.insert("TOOLCELL_INPUT".to_string(), format!("{}/{}", INPUT_MOUNT, INPUT_FILE));
        env.insert("TOOLCELL_OUTPUT_DIR".to_string(), OUTPUT_MOUNT.to_string());
        env.insert("TOOLCELL_EXECUTION_ID".to_string(), ctx.execution_id.to_string());

        let mut mounts = vec![
            Mount::host(workspace.input_dir(), INPUT_MOUNT, true),
            Mount::host(workspace.output_dir(), OUTPUT_MOUNT, false),
        ];
        if let Some(volume) = volume {
            let target = self.volumes.config().mount_path.clone();
            env.insert("TOOLCELL_DATA_DIR".to_string(), target.clone());
            mounts.push(Mount::volume(volume.name.clone(), target));
        }

        let add_capabilities = def
            .capabilities
            .iter()
            .filter(|cap| {
                let allowed = self
                    .config
                    .allowed_capabilities
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(cap));
                if !allowed {
                    warn!(tool_id = %def.id, capability = %cap, "Capability not in allow-list; dropped");
                }
                allowed
            })
            .cloned()
            .collect();

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_EXECUTION_ID.to_string(), ctx.execution_id.to_string());
        labels.insert(LABEL_TOOL_ID.to_string(), def.id.clone());

        LaunchSpec {
            name: format!(
                "{}-{}-{}",
                self.config.name_prefix,
                sanitize_name(&def.id),
                ctx.execution_id.short()
            ),
            image: tool.executable.image.clone(),
            command: tool.executable.command.clone(),
            workdir: Some(INPUT_MOUNT.to_string()),
            env,
            mounts,
            memory_mb: (ctx.resources.memory_mb > 0.0).then_some(ctx.resources.memory_mb),
            cpus: (ctx.resources.cpu > 0.0).then_some(ctx.resources.cpu),
            network: def.wants_network(),
            hardening: Hardening {
                add_capabilities,
                pids_limit: self.config.pids_limit,
                nofile_limit: self.config.nofile_limit,
                nproc_limit: self.config.nproc_limit,
                tmpfs_size_mb: self.config.tmpfs_size_mb,
                io_throttle: self.config.io_throttle.as_ref().map(|t| DeviceThrottle {
                    device: t.device.clone(),
                    read_rate: t.read_rate.clone(),
                    write_rate: t.write_rate.clone(),
                }),
                user: self.config.user.clone(),
                // stdout and stderr share one log
                log_max_bytes: Some(2 * self.config.max_output_bytes as u64),
                ..Hardening::default()
            },
            labels,
        }
    }
}

async fn read_json(dir: &Path, file: &'static str) -> Result<Option<Value>, SandboxError> {
    let path = dir.join(file);
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(SandboxError::OutputParse {
                file,
                reason: e.to_string(),
            });
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| SandboxError::OutputParse {
            file,
            reason: e.to_string(),
        })
}

/// `error.json` must carry a `message`; `details` (or the whole object) is
/// passed through.
fn tool_reported(error: Value) -> SandboxError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("tool reported an error without a message: {}", error));
    let details = match error.get("details") {
        Some(details) => Some(details.clone()),
        None if error.is_object() && error.as_object().is_some_and(|o| o.len() > 1) => Some(error),
        None => None,
    };
    SandboxError::ToolReported { message, details }
}
