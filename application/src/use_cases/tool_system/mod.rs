//! Tool system (orchestrator)
//!
//! [`ToolSystem`] is a cheap, cloneable handle to a scheduler task that owns
//! the tool registry, the admission queue and the resource pools:
//!
//! ```text
//! execute_tool ─▶ [queue] ─▶ allocate ─▶ SandboxRunner ─▶ release ─▶ ledger
//!                   ▲  FIFO, at most max_concurrent_executions running  │
//!                   └──────────────────── pump ◀───────────────────────┘
//! ```
//!
//! Requests are admitted in FIFO order; completion order is unconstrained.
//! A critical error recorded in the last `critical_ttl` trips a global
//! circuit breaker that rejects new executions with
//! [`ToolSystemError::SystemUnstable`].

mod registry;
mod scheduler;

pub use registry::ToolRegistry;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use toolcell_domain::{
    ErrorCode, ResourceAllocation, ResourceAmounts, ResourceError, Tool, ToolDefinition,
    ToolExecutionResult,
};

use crate::config::EngineConfig;
use crate::events::{EventBus, SystemEvent};
use crate::ports::container_runtime::ContainerRuntime;
use crate::use_cases::container_monitor::ContainerMonitor;
use crate::use_cases::error_handler::ErrorHandler;
use crate::use_cases::resource_manager::{ResourceManager, ResourceUsage};
use crate::use_cases::sandbox_runner::SandboxRunner;
use crate::use_cases::volume_manager::VolumeManager;

use scheduler::{Scheduler, SchedulerCommand, SchedulerParts};

/// Errors surfaced to callers of [`ToolSystem`].
#[derive(Error, Debug)]
pub enum ToolSystemError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool: {0}")]
    InvalidTool(String),

    #[error("Tool '{tool_id}' depends on '{dependency}', which is not registered")]
    MissingDependency { tool_id: String, dependency: String },

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("System unstable: recent critical errors; refusing new executions")]
    SystemUnstable,

    #[error(transparent)]
    Resources(#[from] ResourceError),

    #[error("Tool system is shutting down")]
    ShuttingDown,

    #[error("Shutdown failed: {0}")]
    ShutdownFailed(String),

    #[error("Scheduler task is no longer running")]
    SchedulerGone,
}

impl ToolSystemError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ToolSystemError::ToolNotFound(_) => ErrorCode::ToolNotFound,
            ToolSystemError::InvalidTool(_) => ErrorCode::InvalidTool,
            ToolSystemError::MissingDependency { .. } => ErrorCode::MissingDependency,
            ToolSystemError::DuplicateTool(_) => ErrorCode::DuplicateTool,
            ToolSystemError::SystemUnstable => ErrorCode::SystemUnstable,
            ToolSystemError::Resources(ResourceError::InvalidRequirements(_)) => ErrorCode::InvalidTool,
            ToolSystemError::Resources(_) => ErrorCode::InsufficientResources,
            ToolSystemError::ShuttingDown => ErrorCode::ShuttingDown,
            ToolSystemError::ShutdownFailed(_) => ErrorCode::ShutdownError,
            ToolSystemError::SchedulerGone => ErrorCode::Internal,
        }
    }
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub running: usize,
    pub queued: usize,
    /// Highest `running` observed since start
    pub peak_running: usize,
    pub registered: usize,
    pub shutting_down: bool,
}

#[derive(Clone)]
pub struct ToolSystem {
    cmd_tx: mpsc::UnboundedSender<SchedulerCommand>,
    events: EventBus,
    errors: Arc<ErrorHandler>,
    monitor: ContainerMonitor,
    volumes: Arc<VolumeManager>,
}

impl ToolSystem {
    /// Build every component and spawn the scheduler task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: EngineConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_events(config, runtime, EventBus::new())
    }

    /// Like [`new`](Self::new) but publishing on an existing bus, so
    /// subscribers can attach before anything is emitted.
    pub fn with_events(config: EngineConfig, runtime: Arc<dyn ContainerRuntime>, events: EventBus) -> Self {
        let errors = Arc::new(ErrorHandler::new(&config.errors, events.clone()));
        let monitor = ContainerMonitor::new(runtime.clone(), errors.clone(), events.clone(), config.monitor.clone());
        let volumes = Arc::new(VolumeManager::new(runtime.clone(), config.volumes.clone()));
        let runner = Arc::new(SandboxRunner::new(
            runtime,
            volumes.clone(),
            monitor.clone(),
            config.sandbox.clone(),
        ));

        let scheduler = Scheduler::new(SchedulerParts {
            resources: ResourceManager::new(&config.resources, events.clone()),
            runner,
            errors: errors.clone(),
            monitor: monitor.clone(),
            volumes: volumes.clone(),
            events: events.clone(),
            max_concurrent: config.scheduler.max_concurrent_executions,
            maintenance_interval: config.scheduler.maintenance_interval,
        });
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(scheduler.run(cmd_rx));

        Self {
            cmd_tx,
            events,
            errors,
            monitor,
            volumes,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T, ToolSystemError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(make(tx)).map_err(|_| ToolSystemError::SchedulerGone)?;
        rx.await.map_err(|_| ToolSystemError::SchedulerGone)
    }

    /// Register a tool.
    ///
    /// Fails with `InvalidTool`, `DuplicateTool` or `MissingDependency`.
    /// Emits `tool:registered` on success.
    pub async fn register_tool(&self, tool: Tool) -> Result<ToolDefinition, ToolSystemError> {
        self.request(|reply| SchedulerCommand::Register {
            tool: Box::new(tool),
            reply,
        })
        .await?
    }

    /// Returns `false` if no such tool was registered.
    pub async fn unregister_tool(&self, tool_id: &str) -> bool {
        self.request(|reply| SchedulerCommand::Unregister {
            tool_id: tool_id.to_string(),
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Queue one execution and wait for it to finish.
    ///
    /// Errors are admission failures; anything that goes wrong once the
    /// sandbox is involved comes back as a failed [`ToolExecutionResult`].
    pub async fn execute_tool(&self, tool_id: &str, input: Value) -> Result<ToolExecutionResult, ToolSystemError> {
        self.request(|reply| SchedulerCommand::Execute {
            tool_id: tool_id.to_string(),
            input,
            reply,
        })
        .await?
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolSystemError> {
        self.request(|reply| SchedulerCommand::ListTools { reply }).await
    }

    pub async fn status(&self) -> Result<SystemStatus, ToolSystemError> {
        self.request(|reply| SchedulerCommand::Status { reply }).await
    }

    pub async fn resource_usage(&self) -> Result<ResourceUsage, ToolSystemError> {
        self.request(|reply| SchedulerCommand::ResourceUsage { reply }).await
    }

    pub async fn allocations(&self) -> Result<Vec<ResourceAllocation>, ToolSystemError> {
        self.request(|reply| SchedulerCommand::Allocations { reply }).await
    }

    /// Change total host capacity without touching existing allocations.
    pub async fn update_system_resources(&self, capacity: ResourceAmounts) -> Result<(), ToolSystemError> {
        self.request(|reply| SchedulerCommand::UpdateResources { capacity, reply })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn errors(&self) -> &Arc<ErrorHandler> {
        &self.errors
    }

    pub fn monitor(&self) -> &ContainerMonitor {
        &self.monitor
    }

    pub fn volumes(&self) -> &Arc<VolumeManager> {
        &self.volumes
    }

    /// Stop admitting work, wait for running and queued executions to
    /// drain, then stop all monitors and sweep volumes.
    ///
    /// Calling it again after completion returns the first outcome.
    pub async fn shutdown(&self) -> Result<(), ToolSystemError> {
        self.request(|reply| SchedulerCommand::Shutdown { reply }).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceConfig, SchedulerConfig};
    use crate::testing::{FakeBehavior, FakeRuntime};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use toolcell_domain::{ErrorFilter, ErrorReport, ErrorSeverity, ResourceKind, ResourceRequirements, ToolExecutable};

    fn config(max_concurrent: usize) -> EngineConfig {
        EngineConfig {
            scheduler: SchedulerConfig {
                max_concurrent_executions: max_concurrent,
                ..SchedulerConfig::default()
            },
            resources: ResourceConfig {
                capacity: ResourceAmounts::new(4.0, 4096.0, 10240.0, 100.0),
                reservation_margin: 0.2,
            },
            ..EngineConfig::default()
        }
    }

    fn system(fake: &Arc<FakeRuntime>, max_concurrent: usize) -> ToolSystem {
        ToolSystem::new(config(max_concurrent), fake.clone())
    }

    fn tool(id: &str, image: &str, cpu: &str, memory: &str) -> Tool {
        Tool::new(
            ToolDefinition::new(id, id, "1.0.0").with_resources(ResourceRequirements::new(cpu, memory)),
            ToolExecutable::new(image).with_command(["python", "main.py"]),
        )
    }

    fn calc_handler(fake: &FakeRuntime) {
        fake.on_image("calc", |inv| {
            let input = inv.input();
            match input["operation"].as_str() {
                Some("add") => {
                    let sum = input["a"].as_i64().unwrap_or(0) + input["b"].as_i64().unwrap_or(0);
                    inv.write_output("output.json", &json!({ "result": sum }));
                    FakeBehavior::exit(0)
                }
                _ => {
                    inv.write_output("error.json", &json!({ "message": "unsupported operation" }));
                    FakeBehavior::exit(1)
                }
            }
        });
    }

    #[tokio::test]
    async fn test_end_to_end_add() {
        let fake = Arc::new(FakeRuntime::new());
        calc_handler(&fake);
        let ts = system(&fake, 5);
        let mut events = ts.subscribe();

        ts.register_tool(tool("calc", "calc", "0.1", "128M")).await.unwrap();
        let result = ts
            .execute_tool("calc", json!({"operation": "add", "a": 2, "b": 3}))
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data, Some(json!({"result": 5})));

        let usage = ts.resource_usage().await.unwrap();
        assert_eq!(usage.active_allocations, 0);
        assert_eq!(usage.get(ResourceKind::Cpu).used, 0.0);
        assert_eq!(usage.get(ResourceKind::Memory).used, 0.0);

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["tool:registered", "resourceAllocated", "resourceReleased", "execution:completed"]
        );
    }

    #[tokio::test]
    async fn test_allocation_carries_instance_while_running() {
        let fake = Arc::new(FakeRuntime::new());
        fake.on_image("slow", |_| FakeBehavior::ExitAfter {
            delay: Duration::from_millis(200),
            code: 0,
        });
        let ts = system(&fake, 5);
        ts.register_tool(tool("slow", "slow", "0.5", "64M")).await.unwrap();

        let handle = {
            let ts = ts.clone();
            tokio::spawn(async move { ts.execute_tool("slow", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let allocations = ts.allocations().await.unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].tool_id, "slow");
        assert!(allocations[0].instance_id.as_deref().is_some_and(|id| id.starts_with("fake-")));

        handle.await.unwrap().unwrap();
        assert!(ts.allocations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tool_error_is_contained_in_result() {
        let fake = Arc::new(FakeRuntime::new());
        calc_handler(&fake);
        let ts = system(&fake, 5);
        ts.register_tool(tool("calc", "calc", "0.1", "128M")).await.unwrap();

        let result = ts.execute_tool("calc", json!({"operation": "div"})).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code(), Some(ErrorCode::ToolError));

        let recorded = ts.errors().get_errors(&ErrorFilter::default().code(ErrorCode::ToolError));
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].tool_id.as_deref(), Some("calc"));
        assert!(recorded[0].instance_id.is_some());
    }

    #[tokio::test]
    async fn test_rejects_over_allocation() {
        let fake = Arc::new(FakeRuntime::new());
        calc_handler(&fake);
        let ts = system(&fake, 5);
        ts.register_tool(tool("big", "calc", "1000", "128M")).await.unwrap();

        let err = ts.execute_tool("big", json!({})).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientResources);
        assert!(ts.allocations().await.unwrap().is_empty());
        assert!(fake.launched().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let fake = Arc::new(FakeRuntime::new());
        let ts = system(&fake, 5);
        let err = ts.execute_tool("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolSystemError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_registration_policies() {
        let fake = Arc::new(FakeRuntime::new());
        let ts = system(&fake, 5);

        let mut report = tool("report", "calc", "0.1", "16M");
        report.definition = report.definition.with_dependency("calc", ">=1.0");
        assert!(matches!(
            ts.register_tool(report.clone()).await,
            Err(ToolSystemError::MissingDependency { .. })
        ));

        ts.register_tool(tool("calc", "calc", "0.1", "16M")).await.unwrap();
        ts.register_tool(report).await.unwrap();
        assert!(matches!(
            ts.register_tool(tool("calc", "calc", "0.1", "16M")).await,
            Err(ToolSystemError::DuplicateTool(_))
        ));

        let ids: Vec<_> = ts.list_tools().await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["calc", "report"]);

        assert!(ts.unregister_tool("report").await);
        assert!(!ts.unregister_tool("report").await);
        assert_eq!(ts.status().await.unwrap().registered, 1);
    }

    #[tokio::test]
    async fn test_admission_ceiling() {
        let fake = Arc::new(FakeRuntime::new());
        fake.on_image("slow", |inv| {
            inv.write_output("output.json", &json!("done"));
            FakeBehavior::ExitAfter {
                delay: Duration::from_millis(50),
                code: 0,
            }
        });
        let ts = system(&fake, 2);
        ts.register_tool(tool("slow", "slow", "0.1", "16M")).await.unwrap();

        let runs = (0..8).map(|_| {
            let ts = ts.clone();
            async move { ts.execute_tool("slow", json!({})).await }
        });
        let results = futures::future::join_all(runs).await;

        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|r| r.success)));
        assert_eq!(fake.launched().len(), 8);
        assert!(fake.max_running() <= 2, "max running {}", fake.max_running());
        let status = ts.status().await.unwrap();
        assert_eq!(status.peak_running, 2);
        assert_eq!(status.running, 0);
        assert_eq!(status.queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_tool_times_out() {
        let fake = Arc::new(FakeRuntime::new());
        fake.on_image("hang", |_| FakeBehavior::Hang);
        let ts = system(&fake, 5);
        let mut t = tool("hang", "hang", "0.1", "16M");
        t.definition = t.definition.with_timeout_secs(3);
        ts.register_tool(t).await.unwrap();

        let started = tokio::time::Instant::now();
        let result = ts.execute_tool("hang", json!({})).await.unwrap();

        assert_eq!(result.error_code(), Some(ErrorCode::ExecutionTimeout));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(fake.killed().len(), 1);
        let recorded = ts.errors().get_errors(&ErrorFilter::default().code(ErrorCode::ExecutionTimeout));
        assert_eq!(recorded[0].severity, ErrorSeverity::High);
    }

    #[tokio::test]
    async fn test_circuit_breaker_window() {
        let fake = Arc::new(FakeRuntime::new());
        calc_handler(&fake);
        let ts = system(&fake, 5);
        ts.register_tool(tool("calc", "calc", "0.1", "16M")).await.unwrap();
        let input = json!({"operation": "add", "a": 1, "b": 1});

        ts.errors().handle_error_at(
            ErrorReport::new(ErrorCode::Internal, "boom").with_severity(ErrorSeverity::Critical),
            Utc::now() - chrono::Duration::minutes(29),
        );
        let err = ts.execute_tool("calc", input.clone()).await.unwrap_err();
        assert!(matches!(err, ToolSystemError::SystemUnstable));
        let unstable = ts.errors().get_errors(&ErrorFilter::default().code(ErrorCode::SystemUnstable));
        assert_eq!(unstable.len(), 1);
        assert_eq!(unstable[0].severity, ErrorSeverity::High);

        ts.errors().clear();
        ts.errors().handle_error_at(
            ErrorReport::new(ErrorCode::Internal, "boom").with_severity(ErrorSeverity::Critical),
            Utc::now() - chrono::Duration::minutes(31),
        );
        assert!(ts.execute_tool("calc", input).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects() {
        let fake = Arc::new(FakeRuntime::new());
        fake.on_image("slow", |inv| {
            inv.write_output("output.json", &json!(1));
            FakeBehavior::ExitAfter {
                delay: Duration::from_millis(100),
                code: 0,
            }
        });
        let ts = system(&fake, 5);
        ts.register_tool(tool("slow", "slow", "0.1", "16M")).await.unwrap();

        let in_flight = {
            let ts = ts.clone();
            tokio::spawn(async move { ts.execute_tool("slow", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        ts.shutdown().await.unwrap();
        assert_eq!(ts.status().await.unwrap().running, 0);
        assert!(in_flight.await.unwrap().unwrap().success);

        let err = ts.execute_tool("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolSystemError::ShuttingDown));
        assert!(ts.status().await.unwrap().shutting_down);
        ts.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_cleanup_failure_is_critical() {
        let fake = Arc::new(FakeRuntime::new());
        fake.fail_volume_listing(true);
        let ts = system(&fake, 5);

        let err = ts.shutdown().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ShutdownError);
        let recorded = ts.errors().get_errors(&ErrorFilter::default().code(ErrorCode::ShutdownError));
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].severity, ErrorSeverity::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_failure_is_recorded_not_fatal() {
        let fake = Arc::new(FakeRuntime::new());
        calc_handler(&fake);
        fake.fail_volume_listing(true);
        let mut cfg = config(5);
        cfg.scheduler.maintenance_interval = Duration::from_secs(60);
        let ts = ToolSystem::new(cfg, fake.clone());
        ts.register_tool(tool("calc", "calc", "0.1", "16M")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;

        let recorded = ts.errors().get_errors(&ErrorFilter::default().code(ErrorCode::CleanupError));
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].severity, ErrorSeverity::Medium);
        let result = ts
            .execute_tool("calc", json!({"operation": "add", "a": 1, "b": 1}))
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_runner_panic_reclaims_sandbox_and_volume() {
        let fake = Arc::new(FakeRuntime::new());
        calc_handler(&fake);
        fake.panic_on_wait(true);
        let mut cfg = config(5);
        cfg.volumes.persistent = false;
        let ts = ToolSystem::new(cfg, fake.clone());
        let t = tool("calc", "calc", "0.1", "16M").with_persistent_file("state.json", "{}");
        ts.register_tool(t).await.unwrap();

        let result = ts.execute_tool("calc", json!({"operation": "add", "a": 1, "b": 1})).await.unwrap();

        assert_eq!(result.error_code(), Some(ErrorCode::Internal));
        assert_eq!(fake.launched().len(), 1);
        assert_eq!(fake.live_containers(), 0);
        assert!(fake.volume_names().is_empty());
        assert!(ts.allocations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_system_resources() {
        let fake = Arc::new(FakeRuntime::new());
        calc_handler(&fake);
        let ts = system(&fake, 5);
        ts.register_tool(tool("calc", "calc", "6", "16M")).await.unwrap();
        let input = json!({"operation": "add", "a": 1, "b": 2});

        assert!(ts.execute_tool("calc", input.clone()).await.is_err());
        ts.update_system_resources(ResourceAmounts::new(16.0, 4096.0, 10240.0, 100.0))
            .await
            .unwrap();
        assert!(ts.execute_tool("calc", input).await.unwrap().success);
        assert_eq!(ts.resource_usage().await.unwrap().cpu.total, 16.0);
    }
}
