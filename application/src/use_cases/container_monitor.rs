//! Liveness, health, and resource supervision of running sandboxes.
//!
//! Each monitored instance gets a cancellable polling task keyed by its
//! instance ID. One tick ([`ContainerMonitor::poll_once`]) runs, in order:
//!
//! 1. **Liveness**: `inspect`. An inspect failure is fatal for the monitor
//!    (recorded, monitoring ends). An exited instance is marked stopped with
//!    a `liveness` warning.
//! 2. **Health**: the runtime's probe string mapped to [`HealthStatus`].
//! 3. **Stats**: a normalised sample checked against the thresholds.
//!    A stats failure is recorded and the loop keeps going.
//!
//! Threshold breaches only warn; they never stop the instance. State is
//! retained after an instance stops until [`ContainerMonitor::prune_stopped`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use toolcell_domain::{
    ContainerStats, ContainerWarning, ErrorCode, ErrorReport, ErrorSeverity, HealthStatus, MonitoredContainer,
    WarningMetric,
};

use crate::config::MonitorConfig;
use crate::events::{EventBus, SystemEvent};
use crate::ports::container_runtime::ContainerRuntime;
use crate::use_cases::error_handler::ErrorHandler;

/// What the polling loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Continue,
    Stopped,
}

#[derive(Clone)]
pub struct ContainerMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Arc<dyn ContainerRuntime>,
    errors: Arc<ErrorHandler>,
    events: EventBus,
    config: MonitorConfig,
    containers: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    state: MonitoredContainer,
    tool_id: Option<String>,
    cancel: Option<CancellationToken>,
}

impl ContainerMonitor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        errors: Arc<ErrorHandler>,
        events: EventBus,
        config: MonitorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                errors,
                events,
                config,
                containers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Begin tracking `instance_id` without spawning a polling task.
    ///
    /// Used by [`start_monitoring`](Self::start_monitoring) and by callers
    /// that drive [`poll_once`](Self::poll_once) themselves.
    pub fn track(&self, instance_id: &str, tool_id: Option<&str>) {
        let mut containers = self.lock();
        containers.insert(
            instance_id.to_string(),
            Entry {
                state: MonitoredContainer::new(instance_id, Utc::now()),
                tool_id: tool_id.map(str::to_string),
                cancel: None,
            },
        );
    }

    /// Track `instance_id` and poll it every `poll_interval` until it stops
    /// or [`stop_monitoring`](Self::stop_monitoring) is called.
    pub fn start_monitoring(&self, instance_id: &str, tool_id: Option<&str>) {
        self.track(instance_id, tool_id);
        let token = CancellationToken::new();
        if let Some(entry) = self.lock().get_mut(instance_id) {
            entry.cancel = Some(token.clone());
        }

        let monitor = self.clone();
        let id = instance_id.to_string();
        let period = self.inner.config.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if monitor.poll_once(&id).await == PollOutcome::Stopped {
                            break;
                        }
                    }
                }
            }
            debug!(instance_id = %id, "Monitoring loop ended");
        });
        debug!(instance_id, "Monitoring started");
    }

    /// Stop polling `instance_id` and mark it stopped. Returns `false` if it
    /// was not being monitored.
    pub fn stop_monitoring(&self, instance_id: &str) -> bool {
        let mut containers = self.lock();
        let Some(entry) = containers.get_mut(instance_id) else {
            return false;
        };
        if let Some(token) = entry.cancel.take() {
            token.cancel();
        }
        let was_monitoring = entry.state.is_monitoring();
        entry.state.mark_stopped(Utc::now());
        was_monitoring
    }

    /// Stop every active monitor. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, e)| e.state.is_monitoring())
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter(|id| self.stop_monitoring(id)).count()
    }

    /// Run one supervision tick.
    pub async fn poll_once(&self, instance_id: &str) -> PollOutcome {
        let tool_id = {
            let containers = self.lock();
            match containers.get(instance_id) {
                Some(entry) if entry.state.is_monitoring() => entry.tool_id.clone(),
                _ => return PollOutcome::Stopped,
            }
        };

        // (a) liveness
        let state = match self.inner.runtime.inspect(instance_id).await {
            Ok(state) => state,
            // Stopped (and usually removed) while the inspect was in flight
            Err(_) if !self.is_monitoring(instance_id) => return PollOutcome::Stopped,
            Err(e) => {
                let message = format!("Liveness check failed for {}: {}", instance_id, e);
                self.record_error(instance_id, tool_id.as_deref(), ErrorSeverity::High, &message);
                self.finish(instance_id);
                return PollOutcome::Stopped;
            }
        };

        if !state.running {
            let message = match state.exit_code {
                Some(code) => format!("Instance {} is no longer running (exit code {})", instance_id, code),
                None => format!("Instance {} is no longer running", instance_id),
            };
            let warning = ContainerWarning {
                instance_id: instance_id.to_string(),
                metric: WarningMetric::Liveness,
                value: 0.0,
                threshold: 1.0,
                message,
                timestamp: Utc::now(),
            };
            if let Some(entry) = self.lock().get_mut(instance_id) {
                entry.state.warnings.push(warning.clone());
            }
            self.emit_warning(warning);
            self.finish(instance_id);
            return PollOutcome::Stopped;
        }

        // (b) health
        let health = HealthStatus::from_runtime(state.health.as_deref());
        {
            let mut containers = self.lock();
            if let Some(entry) = containers.get_mut(instance_id) {
                if !entry.state.is_monitoring() {
                    return PollOutcome::Stopped;
                }
                entry.state.health = health;
                entry.state.last_checked = Some(Utc::now());
            }
        }

        // (c) stats
        match self.inner.runtime.stats(instance_id).await {
            Ok(stats) => {
                self.record_stats(instance_id, stats);
            }
            Err(_) if !self.is_monitoring(instance_id) => return PollOutcome::Stopped,
            Err(e) => {
                let message = format!("Stats collection failed for {}: {}", instance_id, e);
                self.record_error(instance_id, tool_id.as_deref(), ErrorSeverity::Medium, &message);
            }
        }

        PollOutcome::Continue
    }

    /// Store a stats sample and emit a warning per breached threshold.
    pub fn record_stats(&self, instance_id: &str, stats: ContainerStats) -> Vec<ContainerWarning> {
        let now = Utc::now();
        let warnings = self.inner.config.thresholds.evaluate(instance_id, &stats, now);
        {
            let mut containers = self.lock();
            if let Some(entry) = containers.get_mut(instance_id) {
                entry.state.last_stats = Some(stats);
                entry.state.last_checked = Some(now);
                entry.state.warnings.extend(warnings.iter().cloned());
            }
        }
        for warning in &warnings {
            self.emit_warning(warning.clone());
        }
        warnings
    }

    pub fn status(&self, instance_id: &str) -> Option<MonitoredContainer> {
        self.lock().get(instance_id).map(|e| e.state.clone())
    }

    pub fn all(&self) -> Vec<MonitoredContainer> {
        let mut list: Vec<_> = self.lock().values().map(|e| e.state.clone()).collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        list
    }

    pub fn is_monitoring(&self, instance_id: &str) -> bool {
        self.lock()
            .get(instance_id)
            .is_some_and(|e| e.state.is_monitoring())
    }

    /// Drop stopped instances that stopped more than `older_than` ago.
    pub fn prune_stopped(&self, older_than: std::time::Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let cutoff = Utc::now() - age;
        let mut containers = self.lock();
        let before = containers.len();
        containers.retain(|_, e| e.state.is_monitoring() || e.state.stopped_at.is_none_or(|t| t > cutoff));
        before - containers.len()
    }

    /// Default retention used by maintenance.
    pub fn retention(&self) -> std::time::Duration {
        self.inner.config.retain_stopped
    }

    fn finish(&self, instance_id: &str) {
        if let Some(entry) = self.lock().get_mut(instance_id) {
            entry.cancel.take();
            entry.state.mark_stopped(Utc::now());
        }
    }

    fn record_error(&self, instance_id: &str, tool_id: Option<&str>, severity: ErrorSeverity, message: &str) {
        if let Some(entry) = self.lock().get_mut(instance_id) {
            entry.state.errors.push(message.to_string());
        }
        let mut report = ErrorReport::new(ErrorCode::MonitorError, message)
            .with_severity(severity)
            .with_instance(instance_id);
        if let Some(tool_id) = tool_id {
            report = report.with_tool(tool_id);
        }
        self.inner.errors.handle_error(report);
    }

    fn emit_warning(&self, warning: ContainerWarning) {
        warn!(
            instance_id = %warning.instance_id,
            metric = %warning.metric,
            value = warning.value,
            threshold = warning.threshold,
            "{}",
            warning.message
        );
        self.inner.events.publish(SystemEvent::Warning(warning));
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.containers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
