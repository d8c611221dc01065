//! Scheduler task (Actor pattern)
//!
//! Owns the registry, the FIFO queue, the [`ResourceManager`] and the running
//! count. Allocation and release only ever happen on this task, so the pools
//! need no lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use toolcell_domain::{
    ErrorCode, ErrorReport, ErrorSeverity, ExecutionError, ExecutionId, ResourceAllocation,
    ResourceAmounts, Tool, ToolDefinition, ToolExecutionResult,
};

use super::registry::ToolRegistry;
use super::{SystemStatus, ToolSystemError};
use crate::events::{EventBus, SystemEvent};
use crate::use_cases::container_monitor::ContainerMonitor;
use crate::use_cases::error_handler::ErrorHandler;
use crate::use_cases::resource_manager::{ResourceManager, ResourceUsage};
use crate::use_cases::sandbox_runner::{ExecutionContext, SandboxRunner};
use crate::use_cases::volume_manager::{CleanupReport, VolumeError, VolumeManager};

type Reply<T> = oneshot::Sender<T>;
pub(super) type ExecutionReply = Reply<Result<ToolExecutionResult, ToolSystemError>>;

pub(super) enum SchedulerCommand {
    Register {
        tool: Box<Tool>,
        reply: Reply<Result<ToolDefinition, ToolSystemError>>,
    },
    Unregister {
        tool_id: String,
        reply: Reply<bool>,
    },
    Execute {
        tool_id: String,
        input: Value,
        reply: ExecutionReply,
    },
    ListTools {
        reply: Reply<Vec<ToolDefinition>>,
    },
    Status {
        reply: Reply<SystemStatus>,
    },
    ResourceUsage {
        reply: Reply<ResourceUsage>,
    },
    Allocations {
        reply: Reply<Vec<ResourceAllocation>>,
    },
    UpdateResources {
        capacity: ResourceAmounts,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<Result<(), ToolSystemError>>,
    },
}

struct QueueItem {
    execution_id: ExecutionId,
    tool: Arc<Tool>,
    input: Value,
    reply: ExecutionReply,
}

enum TaskOutcome {
    Execution {
        execution_id: ExecutionId,
        tool_id: String,
        reply: ExecutionReply,
        result: ToolExecutionResult,
        duration: Duration,
    },
    Maintenance(Result<CleanupReport, VolumeError>),
    FinalCleanup(Result<CleanupReport, VolumeError>),
}

#[derive(Default)]
struct ShutdownState {
    requested: bool,
    cleanup_started: bool,
    waiters: Vec<Reply<Result<(), ToolSystemError>>>,
    completed: Option<Result<(), String>>,
}

pub(super) struct SchedulerParts {
    pub resources: ResourceManager,
    pub runner: Arc<SandboxRunner>,
    pub errors: Arc<ErrorHandler>,
    pub monitor: ContainerMonitor,
    pub volumes: Arc<VolumeManager>,
    pub events: EventBus,
    pub max_concurrent: usize,
    pub maintenance_interval: Duration,
}

pub(super) struct Scheduler {
    registry: ToolRegistry,
    resources: ResourceManager,
    runner: Arc<SandboxRunner>,
    errors: Arc<ErrorHandler>,
    monitor: ContainerMonitor,
    volumes: Arc<VolumeManager>,
    events: EventBus,
    queue: VecDeque<QueueItem>,
    running: usize,
    peak_running: usize,
    max_concurrent: usize,
    maintenance_interval: Duration,
    maintenance_running: bool,
    shutdown: ShutdownState,
    tasks: JoinSet<TaskOutcome>,
    attach_tx: mpsc::UnboundedSender<(ExecutionId, String)>,
    attach_rx: mpsc::UnboundedReceiver<(ExecutionId, String)>,
}

impl Scheduler {
    pub(super) fn new(parts: SchedulerParts) -> Self {
        let (attach_tx, attach_rx) = mpsc::unbounded_channel();
        Self {
            registry: ToolRegistry::default(),
            resources: parts.resources,
            runner: parts.runner,
            errors: parts.errors,
            monitor: parts.monitor,
            volumes: parts.volumes,
            events: parts.events,
            queue: VecDeque::new(),
            running: 0,
            peak_running: 0,
            max_concurrent: parts.max_concurrent.max(1),
            maintenance_interval: parts.maintenance_interval,
            maintenance_running: false,
            shutdown: ShutdownState::default(),
            tasks: JoinSet::new(),
            attach_tx,
            attach_rx,
        }
    }

    /// Run until every handle is dropped and in-flight work has drained.
    pub(super) async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<SchedulerCommand>) {
        let period = self.maintenance_interval.max(Duration::from_millis(1));
        let mut maintenance = tokio::time::interval_at(Instant::now() + period, period);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        loop {
            if !commands_open && self.tasks.is_empty() && self.queue.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(joined) = self.tasks.join_next() => self.on_task_finished(joined),

                Some((execution_id, instance_id)) = self.attach_rx.recv() => {
                    self.resources.attach_instance(&execution_id, instance_id);
                }

                _ = maintenance.tick() => self.start_maintenance(),

                cmd = cmd_rx.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        debug!("All tool system handles dropped; draining");
                        commands_open = false;
                    }
                },
            }
        }
        debug!("Scheduler stopped");
    }

    fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Register { tool, reply } => {
                let _ = reply.send(self.register(*tool));
            }
            SchedulerCommand::Unregister { tool_id, reply } => {
                let removed = self.registry.unregister(&tool_id).is_some();
                if removed {
                    info!(tool_id = %tool_id, "Tool unregistered");
                    self.events.publish(SystemEvent::ToolUnregistered { tool_id });
                }
                let _ = reply.send(removed);
            }
            SchedulerCommand::Execute { tool_id, input, reply } => self.enqueue(tool_id, input, reply),
            SchedulerCommand::ListTools { reply } => {
                let _ = reply.send(self.registry.list());
            }
            SchedulerCommand::Status { reply } => {
                let _ = reply.send(SystemStatus {
                    running: self.running,
                    queued: self.queue.len(),
                    peak_running: self.peak_running,
                    registered: self.registry.len(),
                    shutting_down: self.shutdown.requested,
                });
            }
            SchedulerCommand::ResourceUsage { reply } => {
                let _ = reply.send(self.resources.usage());
            }
            SchedulerCommand::Allocations { reply } => {
                let _ = reply.send(self.resources.allocations());
            }
            SchedulerCommand::UpdateResources { capacity, reply } => {
                self.resources.update_system_resources(capacity);
                let _ = reply.send(());
                self.pump();
            }
            SchedulerCommand::Shutdown { reply } => self.request_shutdown(reply),
        }
    }

    fn register(&mut self, tool: Tool) -> Result<ToolDefinition, ToolSystemError> {
        let tool_id = tool.id().to_string();
        match self.registry.register(tool) {
            Ok(tool) => {
                info!(tool_id = %tool_id, version = %tool.definition.version, "Tool registered");
                self.events.publish(SystemEvent::ToolRegistered {
                    definition: Box::new(tool.definition.clone()),
                });
                Ok(tool.definition.clone())
            }
            Err(e) => {
                self.record(&e, Some(&tool_id));
                Err(e)
            }
        }
    }

    fn enqueue(&mut self, tool_id: String, input: Value, reply: ExecutionReply) {
        if self.shutdown.requested {
            let err = ToolSystemError::ShuttingDown;
            self.record(&err, Some(&tool_id));
            let _ = reply.send(Err(err));
            return;
        }

        let Some(tool) = self.registry.get(&tool_id) else {
            let err = ToolSystemError::ToolNotFound(tool_id.clone());
            self.record(&err, Some(&tool_id));
            let _ = reply.send(Err(err));
            return;
        };

        if self.errors.has_recent_critical_errors() {
            let err = ToolSystemError::SystemUnstable;
            self.record(&err, Some(&tool_id));
            let _ = reply.send(Err(err));
            return;
        }

        let execution_id = ExecutionId::generate();
        debug!(tool_id = %tool_id, execution_id = %execution_id, queued = self.queue.len() + 1, "Execution queued");
        self.queue.push_back(QueueItem {
            execution_id,
            tool,
            input,
            reply,
        });
        self.pump();
    }

    /// Admit queued executions while under the concurrency ceiling.
    fn pump(&mut self) {
        while self.running < self.max_concurrent {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            let allocation = self.resources.allocate_resources(
                item.tool.id(),
                &item.tool.definition.resources,
                item.execution_id.clone(),
            );
            match allocation {
                Ok(allocation) => self.dispatch(item, allocation.resources),
                Err(e) => {
                    let err = ToolSystemError::Resources(e);
                    self.record(&err, Some(item.tool.id()));
                    let _ = item.reply.send(Err(err));
                }
            }
        }
    }

    fn dispatch(&mut self, item: QueueItem, resources: ResourceAmounts) {
        self.running += 1;
        self.peak_running = self.peak_running.max(self.running);

        let QueueItem {
            execution_id,
            tool,
            input,
            reply,
        } = item;
        let tool_id = tool.id().to_string();
        debug!(tool_id = %tool_id, execution_id = %execution_id, running = self.running, "Execution dispatched");

        let runner = self.runner.clone();
        let reclaimer = self.runner.clone();
        let attach = self.attach_tx.clone();
        let ctx = ExecutionContext {
            execution_id: execution_id.clone(),
            resources,
        };

        self.tasks.spawn(async move {
            let started = Instant::now();
            // A panic in the runner must still release the allocation and
            // the sandbox.
            let run = tokio::spawn(async move {
                let exec_id = ctx.execution_id.clone();
                runner
                    .execute_tool(&tool, &input, &ctx, move |instance_id| {
                        let _ = attach.send((exec_id, instance_id.to_string()));
                    })
                    .await
            });
            let result = match run.await {
                Ok(result) => result,
                Err(e) => {
                    reclaimer.reclaim(&execution_id).await;
                    ToolExecutionResult::failure(ExecutionError::new(
                        ErrorCode::Internal,
                        format!("execution task failed: {}", e),
                    ))
                }
            };
            TaskOutcome::Execution {
                execution_id,
                tool_id,
                reply,
                result,
                duration: started.elapsed(),
            }
        });
    }

    fn on_task_finished(&mut self, joined: Result<TaskOutcome, JoinError>) {
        match joined {
            Ok(TaskOutcome::Execution {
                execution_id,
                tool_id,
                reply,
                result,
                duration,
            }) => self.on_execution_finished(execution_id, tool_id, reply, result, duration),
            Ok(TaskOutcome::Maintenance(result)) => {
                self.maintenance_running = false;
                match result {
                    Ok(report) => debug!(
                        examined = report.examined,
                        removed = report.removed.len(),
                        failed = report.failed.len(),
                        "Maintenance finished"
                    ),
                    Err(e) => {
                        self.errors.handle_error(ErrorReport::new(
                            ErrorCode::CleanupError,
                            format!("Periodic volume cleanup failed: {}", e),
                        ));
                    }
                }
                self.maybe_finish_shutdown();
            }
            Ok(TaskOutcome::FinalCleanup(result)) => self.on_final_cleanup(result),
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!("Scheduler task panicked: {}", e),
        }
    }

    fn on_execution_finished(
        &mut self,
        execution_id: ExecutionId,
        tool_id: String,
        reply: ExecutionReply,
        result: ToolExecutionResult,
        duration: Duration,
    ) {
        self.running = self.running.saturating_sub(1);
        let allocation = self.resources.release_resources(&execution_id);

        if let Some(error) = &result.error {
            let mut report = ErrorReport::new(error.code, error.message.clone()).with_tool(&tool_id);
            if let Some(instance_id) = result
                .metadata
                .instance_id
                .clone()
                .or_else(|| allocation.and_then(|a| a.instance_id))
            {
                report = report.with_instance(instance_id);
            }
            if let Some(details) = &error.details {
                report = report.with_details(details.clone());
            }
            self.errors.handle_error(report);
        }

        self.events.publish(SystemEvent::ExecutionCompleted {
            tool_id,
            execution_id,
            success: result.success,
            duration_ms: duration.as_millis() as u64,
            error_code: result.error_code(),
        });
        let _ = reply.send(Ok(result));

        self.pump();
        self.maybe_finish_shutdown();
    }

    fn start_maintenance(&mut self) {
        if self.maintenance_running || self.shutdown.cleanup_started {
            return;
        }
        self.maintenance_running = true;
        let volumes = self.volumes.clone();
        let monitor = self.monitor.clone();
        self.tasks.spawn(async move {
            let pruned = monitor.prune_stopped(monitor.retention());
            if pruned > 0 {
                debug!(pruned, "Pruned stopped monitor entries");
            }
            TaskOutcome::Maintenance(volumes.cleanup_old_volumes().await)
        });
    }

    fn request_shutdown(&mut self, reply: Reply<Result<(), ToolSystemError>>) {
        if let Some(done) = &self.shutdown.completed {
            let _ = reply.send(done.clone().map_err(ToolSystemError::ShutdownFailed));
            return;
        }
        if !self.shutdown.requested {
            info!(
                running = self.running,
                queued = self.queue.len(),
                "Shutdown requested; draining executions"
            );
        }
        self.shutdown.requested = true;
        self.shutdown.waiters.push(reply);
        self.maybe_finish_shutdown();
    }

    fn maybe_finish_shutdown(&mut self) {
        let idle = self.running == 0 && self.queue.is_empty() && !self.maintenance_running;
        if !self.shutdown.requested || self.shutdown.cleanup_started || !idle {
            return;
        }
        self.shutdown.cleanup_started = true;
        let volumes = self.volumes.clone();
        let monitor = self.monitor.clone();
        self.tasks.spawn(async move {
            let stopped = monitor.stop_all();
            debug!(stopped, "Monitors stopped");
            TaskOutcome::FinalCleanup(volumes.cleanup_old_volumes().await)
        });
    }

    fn on_final_cleanup(&mut self, result: Result<CleanupReport, VolumeError>) {
        let outcome = match result {
            Ok(report) => {
                info!(removed = report.removed.len(), "Tool system shut down");
                Ok(())
            }
            Err(e) => {
                let message = format!("Final cleanup failed: {}", e);
                self.errors.handle_error(
                    ErrorReport::new(ErrorCode::ShutdownError, message.clone())
                        .with_severity(ErrorSeverity::Critical),
                );
                Err(message)
            }
        };
        for waiter in self.shutdown.waiters.drain(..) {
            let _ = waiter.send(outcome.clone().map_err(ToolSystemError::ShutdownFailed));
        }
        self.shutdown.completed = Some(outcome);
    }

    /// Record a caller-facing error in the ledger before returning it.
    fn record(&self, err: &ToolSystemError, tool_id: Option<&str>) {
        let mut report = ErrorReport::new(err.code(), err.to_string());
        if let Some(tool_id) = tool_id {
            report = report.with_tool(tool_id);
        }
        self.errors.handle_error(report);
    }
}
