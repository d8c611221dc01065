//! Host capacity configuration from TOML (`[resources]` section)

use serde::{Deserialize, Serialize};
use toolcell_application::ResourceConfig;
use toolcell_application::config::engine_config::{DEFAULT_MEMORY_MB, DEFAULT_NETWORK_MBPS, DEFAULT_STORAGE_MB};
use toolcell_domain::{ConfigIssue, ConfigIssueCode, ResourceAmounts, parse_size_mb};

/// Host capacity. Sizes use the manifest notation (`"512M"`, `"8G"`).
///
/// # Example
///
/// ```toml
/// [resources]
/// cpu = 4.0
/// memory = "8G"
/// storage = "20G"
/// network_mbps = 1000
/// reservation_margin = 0.2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileResourcesConfig {
    /// CPU units; host parallelism when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    pub memory: String,
    pub storage: String,
    pub network_mbps: f64,
    pub reservation_margin: f64,
}

impl Default for FileResourcesConfig {
    fn default() -> Self {
        Self {
            cpu: None,
            memory: format!("{}M", DEFAULT_MEMORY_MB),
            storage: format!("{}M", DEFAULT_STORAGE_MB),
            network_mbps: DEFAULT_NETWORK_MBPS,
            reservation_margin: ResourceConfig::default().reservation_margin,
        }
    }
}

impl FileResourcesConfig {
    /// Invalid values fall back to the built-in default for that field.
    pub fn to_resource_config(&self) -> (ResourceConfig, Vec<ConfigIssue>) {
        let mut issues = Vec::new();

        let cpu = match self.cpu {
            Some(cpu) if cpu <= 0.0 || !cpu.is_finite() => {
                issues.push(non_positive("resources.cpu", cpu));
                ResourceConfig::host_cpu_count()
            }
            Some(cpu) => cpu,
            None => ResourceConfig::host_cpu_count(),
        };
        let memory_mb = size_field(&self.memory, "resources.memory", DEFAULT_MEMORY_MB, &mut issues);
        let storage_mb = size_field(&self.storage, "resources.storage", DEFAULT_STORAGE_MB, &mut issues);
        let network_mbps = if self.network_mbps > 0.0 {
            self.network_mbps
        } else {
            issues.push(non_positive("resources.network_mbps", self.network_mbps));
            DEFAULT_NETWORK_MBPS
        };

        let reservation_margin = if (0.0..1.0).contains(&self.reservation_margin) {
            self.reservation_margin
        } else {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::MarginOutOfRange,
                "resources.reservation_margin",
                format!("{} is outside [0, 1)", self.reservation_margin),
            ));
            ResourceConfig::default().reservation_margin
        };

        let config = ResourceConfig {
            capacity: ResourceAmounts::new(cpu, memory_mb, storage_mb, network_mbps),
            reservation_margin,
        };
        (config, issues)
    }
}

fn non_positive(key: &str, value: f64) -> ConfigIssue {
    ConfigIssue::error(
        ConfigIssueCode::NonPositiveCapacity,
        key,
        format!("capacity must be positive, got {}", value),
    )
}

fn size_field(raw: &str, key: &str, fallback: f64, issues: &mut Vec<ConfigIssue>) -> f64 {
    match parse_size_mb(raw) {
        Ok(mb) if mb > 0.0 => mb,
        Ok(mb) => {
            issues.push(non_positive(key, mb));
            fallback
        }
        Err(e) => {
            issues.push(ConfigIssue::error(ConfigIssueCode::InvalidResourceValue, key, e.to_string()));
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_defaults() {
        let (config, issues) = FileResourcesConfig::default().to_resource_config();
        assert!(issues.is_empty(), "{:?}", issues);
        assert_eq!(config.capacity.memory_mb, DEFAULT_MEMORY_MB);
        assert_eq!(config.capacity.storage_mb, DEFAULT_STORAGE_MB);
        assert_eq!(config.reservation_margin, 0.2);
    }

    #[test]
    fn test_parses_sizes() {
        let file: FileResourcesConfig = toml::from_str("cpu = 2.5\nmemory = \"2G\"\nstorage = \"512M\"").unwrap();
        let (config, issues) = file.to_resource_config();
        assert!(issues.is_empty());
        assert_eq!(config.capacity.cpu, 2.5);
        assert_eq!(config.capacity.memory_mb, 2048.0);
        assert_eq!(config.capacity.storage_mb, 512.0);
    }

    #[test]
    fn test_reports_bad_values() {
        let file = FileResourcesConfig {
            cpu: Some(0.0),
            memory: "lots".to_string(),
            reservation_margin: 1.0,
            ..Default::default()
        };
        let (config, issues) = file.to_resource_config();
        let codes: Vec<_> = issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&ConfigIssueCode::NonPositiveCapacity));
        assert!(codes.contains(&ConfigIssueCode::InvalidResourceValue));
        assert!(codes.contains(&ConfigIssueCode::MarginOutOfRange));
        assert_eq!(config.capacity.memory_mb, DEFAULT_MEMORY_MB);
    }
}
