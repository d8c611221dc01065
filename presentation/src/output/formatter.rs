//! Output formatter trait

use toolcell_domain::{OutputFormat, ToolExecutionResult};

/// Trait for formatting execution results
pub trait OutputFormatter {
    /// Human-readable rendering
    fn format(&self, result: &ToolExecutionResult) -> String;

    /// Format as JSON
    fn format_json(&self, result: &ToolExecutionResult) -> String;

    fn render(&self, result: &ToolExecutionResult, format: OutputFormat) -> String {
        match format {
            OutputFormat::Full => self.format(result),
            OutputFormat::Json => self.format_json(result),
        }
    }
}
