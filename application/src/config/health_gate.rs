//! Health gating policy applied after a zero exit code.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// When a zero exit code must be confirmed by the container's health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthGate {
    /// Check only when the image defines a probe (default)
    #[default]
    WhenConfigured,
    /// Require a healthy probe; a missing probe fails the execution
    Always,
    /// Never check
    Never,
}

impl HealthGate {
    /// Decide whether the runtime's health string accepts the result.
    ///
    /// `raw` is `None` or `"none"` when no probe is configured.
    pub fn check(&self, raw: Option<&str>) -> Result<(), String> {
        let status = raw.map(|s| s.trim().to_ascii_lowercase()).unwrap_or_default();
        let probe_missing = status.is_empty() || status == "none";
        match self {
            HealthGate::Never => Ok(()),
            HealthGate::WhenConfigured if probe_missing => Ok(()),
            HealthGate::Always if probe_missing => Err("no health probe configured".to_string()),
            _ if status == "healthy" => Ok(()),
            _ => Err(format!("health status is '{}'", status)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthGate::WhenConfigured => "when_configured",
            HealthGate::Always => "always",
            HealthGate::Never => "never",
        }
    }
}

impl FromStr for HealthGate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "when_configured" => Ok(HealthGate::WhenConfigured),
            "always" => Ok(HealthGate::Always),
            "never" => Ok(HealthGate::Never),
            other => Err(format!("unknown health gate '{}'", other)),
        }
    }
}
