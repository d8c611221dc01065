//! Output format value object

use serde::{Deserialize, Serialize};

/// How an execution result is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summary with metadata and captured streams (default)
    #[default]
    Full,
    /// The raw `ToolExecutionResult` as JSON
    Json,
}
