//! Logging configuration from TOML (`[logging]` section)
//!
//! Command-line flags override every field.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    /// `EnvFilter` directive used when neither `-v` nor `RUST_LOG` is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Emit JSON log lines instead of the compact formatter
    pub json: bool,
    /// Directory for daily-rolling log files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// JSONL transcript of engine events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<PathBuf>,
}
