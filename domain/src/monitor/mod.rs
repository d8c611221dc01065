//! Supervisory state for running sandbox instances.
//!
//! ```text
//! unmonitored ──start──▶ monitoring ──poll──▶ {healthy | unhealthy | unknown}
//!                              │                         │
//!                              └──── exit / stop ────────┴──▶ stopped
//! ```
//!
//! A [`MonitoredContainer`] is kept after the instance stops so postmortem
//! queries can still see its warnings and errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health probe state reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    /// Map the runtime's health string. `starting`, `none` and anything
    /// unrecognised are `Unknown`.
    pub fn from_runtime(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("healthy") => HealthStatus::Healthy,
            Some("unhealthy") => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a monitored instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    #[default]
    Monitoring,
    Stopped,
}

/// Normalised resource statistics sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub processes: u64,
}

impl ContainerStats {
    /// Memory usage as a percentage of the limit; `None` without a limit.
    pub fn memory_percent(&self) -> Option<f64> {
        if self.memory_limit_bytes == 0 {
            None
        } else {
            Some(self.memory_used_bytes as f64 / self.memory_limit_bytes as f64 * 100.0)
        }
    }
}

/// Which threshold a warning is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningMetric {
    Cpu,
    Memory,
    Processes,
    Liveness,
}

impl WarningMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningMetric::Cpu => "cpu",
            WarningMetric::Memory => "memory",
            WarningMetric::Processes => "processes",
            WarningMetric::Liveness => "liveness",
        }
    }
}

impl std::fmt::Display for WarningMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerWarning {
    pub instance_id: String,
    pub metric: WarningMetric,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Threshold configuration. A sample must strictly exceed a threshold to warn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorThresholds {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Absolute process count
    pub processes: u64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            memory_percent: 90.0,
            processes: 80,
        }
    }
}

impl MonitorThresholds {
    /// Warnings raised by one stats sample.
    pub fn evaluate(&self, instance_id: &str, stats: &ContainerStats, at: DateTime<Utc>) -> Vec<ContainerWarning> {
        let mut warnings = Vec::new();
        let mut push = |metric: WarningMetric, value: f64, threshold: f64, message: String| {
            warnings.push(ContainerWarning {
                instance_id: instance_id.to_string(),
                metric,
                value,
                threshold,
                message,
                timestamp: at,
            });
        };

        if stats.cpu_percent > self.cpu_percent {
            push(
                WarningMetric::Cpu,
                stats.cpu_percent,
                self.cpu_percent,
                format!("CPU usage {:.1}% exceeds {:.1}%", stats.cpu_percent, self.cpu_percent),
            );
        }
        if let Some(mem) = stats.memory_percent()
            && mem > self.memory_percent
        {
            push(
                WarningMetric::Memory,
                mem,
                self.memory_percent,
                format!("Memory usage {:.1}% of limit exceeds {:.1}%", mem, self.memory_percent),
            );
        }
        if stats.processes > self.processes {
            push(
                WarningMetric::Processes,
                stats.processes as f64,
                self.processes as f64,
                format!("Process count {} exceeds {}", stats.processes, self.processes),
            );
        }
        warnings
    }
}

/// Supervisory record for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredContainer {
    pub instance_id: String,
    pub started_at: DateTime<Utc>,
    pub state: MonitorState,
    pub running: bool,
    pub health: HealthStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_stats: Option<ContainerStats>,
    pub warnings: Vec<ContainerWarning>,
    /// Error messages recorded against this instance
    pub errors: Vec<String>,
}

impl MonitoredContainer {
    pub fn new(instance_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            instance_id: instance_id.into(),
            started_at,
            state: MonitorState::Monitoring,
            running: true,
            health: HealthStatus::Unknown,
            last_checked: None,
            stopped_at: None,
            last_stats: None,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.state == MonitorState::Monitoring
    }

    pub fn mark_stopped(&mut self, at: DateTime<Utc>) {
        self.state = MonitorState::Stopped;
        self.running = false;
        if self.stopped_at.is_none() {
            self.stopped_at = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_mapping() {
        assert_eq!(HealthStatus::from_runtime(Some("healthy")), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_runtime(Some("Unhealthy")), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_runtime(Some("starting")), HealthStatus::Unknown);
        assert_eq!(HealthStatus::from_runtime(None), HealthStatus::Unknown);
    }

    #[test]
    fn test_cpu_threshold_exceeded_once() {
        let stats = ContainerStats {
            cpu_percent: 95.0,
            ..Default::default()
        };
        let warnings = MonitorThresholds::default().evaluate("c1", &stats, Utc::now());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].metric, WarningMetric::Cpu);
        assert_eq!(warnings[0].value, 95.0);
        assert_eq!(warnings[0].threshold, 90.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let stats = ContainerStats {
            cpu_percent: 90.0,
            processes: 80,
            ..Default::default()
        };
        assert!(MonitorThresholds::default().evaluate("c1", &stats, Utc::now()).is_empty());
    }

    #[test]
    fn test_memory_and_process_thresholds() {
        let stats = ContainerStats {
            memory_used_bytes: 95,
            memory_limit_bytes: 100,
            processes: 81,
            ..Default::default()
        };
        let warnings = MonitorThresholds::default().evaluate("c1", &stats, Utc::now());
        let metrics: Vec<_> = warnings.iter().map(|w| w.metric).collect();
        assert_eq!(metrics, vec![WarningMetric::Memory, WarningMetric::Processes]);
    }

    #[test]
    fn test_memory_without_limit_never_warns() {
        let stats = ContainerStats {
            memory_used_bytes: u64::MAX,
            ..Default::default()
        };
        assert!(stats.memory_percent().is_none());
        assert!(MonitorThresholds::default().evaluate("c1", &stats, Utc::now()).is_empty());
    }

    #[test]
    fn test_mark_stopped_keeps_first_timestamp() {
        let t0 = Utc::now();
        let mut c = MonitoredContainer::new("c1", t0);
        c.mark_stopped(t0);
        c.mark_stopped(t0 + chrono::Duration::seconds(5));
        assert_eq!(c.stopped_at, Some(t0));
        assert!(!c.is_monitoring());
    }
}
