//! Output configuration from TOML (`[output]` section)

use serde::{Deserialize, Serialize};
use toolcell_domain::OutputFormat;

/// # Example
///
/// ```toml
/// [output]
/// format = "json"
/// show_streams = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOutputConfig {
    /// Result format; `--output` overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    pub color: bool,
    /// Print captured stdout/stderr of the sandbox in `full` format
    pub show_streams: bool,
}

impl Default for FileOutputConfig {
    fn default() -> Self {
        Self {
            format: None,
            color: true,
            show_streams: true,
        }
    }
}

impl FileOutputConfig {
    pub fn format_or_default(&self) -> OutputFormat {
        self.format.unwrap_or_default()
    }
}
