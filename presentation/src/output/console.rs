//! Console output formatter for execution results and admin commands

use chrono::{DateTime, Utc};
use colored::Colorize;
use toolcell_application::{CleanupReport, VolumeInfo};
use toolcell_domain::{ConfigIssue, Severity, ToolExecutionResult};

use crate::output::formatter::OutputFormatter;

/// Force colors off (or back to terminal detection).
pub fn set_color(enabled: bool) {
    if enabled {
        colored::control::unset_override();
    } else {
        colored::control::set_override(false);
    }
}

/// Formats results for console display
pub struct ConsoleFormatter {
    title: String,
    show_streams: bool,
}

impl Default for ConsoleFormatter {
    fn default() -> Self {
        Self::new("result", true)
    }
}

impl ConsoleFormatter {
    /// `title` heads the result, usually the tool ID
    pub fn new(title: impl Into<String>, show_streams: bool) -> Self {
        Self {
            title: title.into(),
            show_streams,
        }
    }

    /// Format the complete execution result
    pub fn format_result(&self, result: &ToolExecutionResult) -> String {
        let mut output = String::new();

        let title = if result.success {
            format!("{} {}", "v".green().bold(), self.title.bold())
        } else {
            format!("{} {}", "x".red().bold(), self.title.bold())
        };
        output.push_str(&title);
        output.push('\n');

        let meta = &result.metadata;
        let mut facts = vec![format!("{} ms", meta.duration_ms)];
        if let Some(code) = meta.exit_code {
            facts.push(format!("exit {}", code));
        }
        if let Some(id) = &meta.execution_id {
            facts.push(format!("execution {}", id));
        }
        output.push_str(&format!("{}\n", facts.join(" · ").dimmed()));

        if let Some(data) = &result.data {
            output.push_str(&Self::section_header("Output"));
            output.push_str(&serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string()));
            output.push('\n');
        }

        if let Some(error) = &result.error {
            output.push_str(&Self::section_header("Error"));
            output.push_str(&format!("{} {}\n", format!("[{}]", error.code).red().bold(), error.message));
            if let Some(details) = &error.details {
                let pretty = serde_json::to_string_pretty(details).unwrap_or_else(|_| details.to_string());
                output.push_str(&Self::indent(&pretty, "  "));
                output.push('\n');
            }
        }

        if self.show_streams {
            for (name, stream) in [("stdout", &meta.stdout), ("stderr", &meta.stderr)] {
                if let Some(text) = stream.as_deref().filter(|s| !s.trim().is_empty()) {
                    output.push_str(&Self::section_header(name));
                    output.push_str(&Self::indent(text.trim_end(), "  "));
                    output.push('\n');
                }
            }
        }

        output
    }

    pub fn format_volumes(volumes: &[VolumeInfo], now: DateTime<Utc>) -> String {
        if volumes.is_empty() {
            return format!("{}\n", "No managed volumes".dimmed());
        }
        let mut output = String::new();
        for volume in volumes {
            let age = volume
                .created_at
                .map(|t| Self::age(now - t))
                .unwrap_or_else(|| "unknown age".to_string());
            let tool = volume
                .labels
                .get("toolcell.tool-id")
                .map(|id| format!(" ({})", id))
                .unwrap_or_default();
            output.push_str(&format!("  {}{}  {}\n", volume.name.bold(), tool, age.dimmed()));
        }
        output
    }

    pub fn format_cleanup(report: &CleanupReport) -> String {
        let mut output = format!(
            "{} examined {}, removed {}, failed {}\n",
            "Volume cleanup:".cyan().bold(),
            report.examined,
            report.removed.len(),
            report.failed.len()
        );
        for name in &report.removed {
            output.push_str(&format!("  {} {}\n", "-".green(), name));
        }
        for name in &report.failed {
            output.push_str(&format!("  {} {}\n", "x".red(), name));
        }
        output
    }

    pub fn format_issues(issues: &[ConfigIssue]) -> String {
        if issues.is_empty() {
            return format!("{} Configuration is valid\n", "v".green());
        }
        issues
            .iter()
            .map(|issue| match issue.severity {
                Severity::Error => format!("{} {}: {}\n", "error".red().bold(), issue.key, issue.message),
                Severity::Warning => format!("{} {}: {}\n", "warning".yellow().bold(), issue.key, issue.message),
            })
            .collect()
    }

    fn age(elapsed: chrono::Duration) -> String {
        let secs = elapsed.num_seconds().max(0);
        match secs {
            s if s < 60 => format!("{}s old", s),
            s if s < 3600 => format!("{}m old", s / 60),
            s if s < 86_400 => format!("{}h old", s / 3600),
            s => format!("{}d old", s / 86_400),
        }
    }

    fn section_header(title: &str) -> String {
        format!("\n{}\n{}\n", title.cyan().bold(), "-".repeat(40))
    }

    /// Indent a multi-line string
    pub fn indent(text: &str, prefix: &str) -> String {
        text.lines()
            .map(|line| format!("{}{}", prefix, line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl OutputFormatter for ConsoleFormatter {
    fn format(&self, result: &ToolExecutionResult) -> String {
        self.format_result(result)
    }

    fn format_json(&self, result: &ToolExecutionResult) -> String {
        serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
    }
}
