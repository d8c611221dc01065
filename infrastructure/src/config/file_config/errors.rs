//! Error ledger configuration from TOML (`[errors]` section)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use toolcell_application::ErrorLedgerConfig;
use toolcell_domain::{ConfigIssue, ConfigIssueCode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileErrorsConfig {
    pub capacity: usize,
    /// Circuit-breaker window for critical errors
    pub critical_ttl_secs: u64,
}

impl Default for FileErrorsConfig {
    fn default() -> Self {
        let d = ErrorLedgerConfig::default();
        Self {
            capacity: d.capacity,
            critical_ttl_secs: d.critical_ttl.as_secs(),
        }
    }
}

impl FileErrorsConfig {
    pub fn to_ledger_config(&self) -> (ErrorLedgerConfig, Vec<ConfigIssue>) {
        let mut issues = Vec::new();
        if self.capacity == 0 {
            issues.push(ConfigIssue::error(
                ConfigIssueCode::ZeroLedgerCapacity,
                "errors.capacity",
                "the ledger must hold at least one record",
            ));
        }
        let config = ErrorLedgerConfig {
            capacity: self.capacity.max(1),
            critical_ttl: Duration::from_secs(self.critical_ttl_secs),
        };
        (config, issues)
    }
}
