//! Progress reporting while an execution is in flight
//!
//! Driven by the engine's event bus: allocation, container warnings, and
//! completion update the indicator.

use std::sync::Mutex;
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use toolcell_application::{EventBus, SystemEvent};

/// Receives engine events relevant to the user.
pub trait ProgressNotifier: Send + Sync {
    fn on_event(&self, event: &SystemEvent);

    /// Called once when the result is in
    fn on_finish(&self, success: bool);
}

/// Spinner on stderr
pub struct ProgressReporter {
    bar: ProgressBar,
    warnings: Mutex<usize>,
}

impl ProgressReporter {
    pub fn new(tool_id: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(Self::spinner_style());
        bar.set_prefix(tool_id.to_string());
        bar.set_message("queued");
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            warnings: Mutex::new(0),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {prefix:.bold.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

impl ProgressNotifier for ProgressReporter {
    fn on_event(&self, event: &SystemEvent) {
        match event {
            SystemEvent::ResourceAllocated { resources, .. } => {
                self.bar.set_message(format!(
                    "running ({} cpu, {} MB)",
                    resources.cpu, resources.memory_mb
                ));
            }
            SystemEvent::Warning(warning) => {
                let mut count = self.warnings.lock().unwrap_or_else(|e| e.into_inner());
                *count += 1;
                self.bar.println(format!("{} {}", "!".yellow().bold(), warning.message));
            }
            SystemEvent::ResourceReleased { .. } => self.bar.set_message("collecting result"),
            _ => {}
        }
    }

    fn on_finish(&self, success: bool) {
        let warnings = *self.warnings.lock().unwrap_or_else(|e| e.into_inner());
        let status = if success { "done".green() } else { "failed".red() };
        if warnings > 0 {
            self.bar
                .finish_with_message(format!("{} ({} warnings)", status, warnings));
        } else {
            self.bar.finish_with_message(status.to_string());
        }
    }
}

/// Simple text-based progress (no fancy UI)
pub struct SimpleProgress;

impl ProgressNotifier for SimpleProgress {
    fn on_event(&self, event: &SystemEvent) {
        match event {
            SystemEvent::ResourceAllocated { tool_id, .. } => {
                eprintln!("{} {} started", "->".cyan(), tool_id.bold());
            }
            SystemEvent::Warning(warning) => {
                eprintln!("  {} {}", "!".yellow(), warning.message);
            }
            _ => {}
        }
    }

    fn on_finish(&self, _success: bool) {}
}

/// No output at all (`--quiet`, JSON output).
pub struct NoProgress;

impl ProgressNotifier for NoProgress {
    fn on_event(&self, _event: &SystemEvent) {}
    fn on_finish(&self, _success: bool) {}
}

/// Forward bus events to `notifier` until the bus closes or the task is aborted.
pub fn spawn_progress<N>(bus: &EventBus, notifier: std::sync::Arc<N>) -> JoinHandle<()>
where
    N: ProgressNotifier + ?Sized + 'static,
{
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => notifier.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
