//! Error ledger records and queries.
//!
//! The ledger itself (bounded storage, notification) lives in the
//! application layer; this module holds the record shape and the pure
//! filter/stats logic so they can be tested without a runtime.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{ErrorCode, ErrorSeverity};

/// An error as reported by a component, before it is timestamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub severity: ErrorSeverity,
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorReport {
    /// Report with the code's default severity.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            severity: code.default_severity(),
            code,
            message: message.into(),
            tool_id: None,
            instance_id: None,
            details: None,
        }
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    pub fn with_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A recorded ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub severity: ErrorSeverity,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Set once the record has been logged
    pub handled: bool,
}

impl ErrorRecord {
    pub fn from_report(report: ErrorReport, timestamp: DateTime<Utc>) -> Self {
        Self {
            severity: report.severity,
            code: report.code,
            tool_id: report.tool_id,
            instance_id: report.instance_id,
            timestamp,
            message: report.message,
            details: report.details,
            handled: false,
        }
    }

    pub fn is_critical_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.severity == ErrorSeverity::Critical && self.timestamp > cutoff
    }
}

/// Query over the ledger. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorFilter {
    pub severity: Option<ErrorSeverity>,
    pub tool_id: Option<String>,
    pub instance_id: Option<String>,
    pub code: Option<ErrorCode>,
    /// Only records strictly newer than this
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ErrorFilter {
    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    pub fn instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &ErrorRecord) -> bool {
        self.severity.is_none_or(|s| record.severity == s)
            && self.code.is_none_or(|c| record.code == c)
            && self
                .tool_id
                .as_deref()
                .is_none_or(|t| record.tool_id.as_deref() == Some(t))
            && self
                .instance_id
                .as_deref()
                .is_none_or(|i| record.instance_id.as_deref() == Some(i))
            && self.since.is_none_or(|since| record.timestamp > since)
    }

    /// Apply to records stored oldest-first; returns newest-first.
    pub fn apply<'a, I>(&self, records: I) -> Vec<ErrorRecord>
    where
        I: DoubleEndedIterator<Item = &'a ErrorRecord>,
    {
        records
            .rev()
            .filter(|r| self.matches(r))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

/// Aggregate view of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_code: BTreeMap<String, usize>,
    /// Critical records inside the circuit-breaker window
    pub critical_in_window: usize,
    pub most_recent: Option<DateTime<Utc>>,
}

impl ErrorStats {
    pub fn compute<'a, I>(records: I, now: DateTime<Utc>, critical_ttl: Duration) -> Self
    where
        I: IntoIterator<Item = &'a ErrorRecord>,
    {
        let cutoff = now - critical_ttl;
        let mut stats = ErrorStats::default();
        for severity in ErrorSeverity::all() {
            stats.by_severity.insert(severity.as_str().to_string(), 0);
        }
        for record in records {
            stats.total += 1;
            *stats.by_severity.entry(record.severity.as_str().to_string()).or_default() += 1;
            *stats.by_code.entry(record.code.as_str().to_string()).or_default() += 1;
            if record.is_critical_since(cutoff) {
                stats.critical_in_window += 1;
            }
            if stats.most_recent.is_none_or(|t| record.timestamp > t) {
                stats.most_recent = Some(record.timestamp);
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: ErrorCode, tool: &str, minutes_ago: i64, now: DateTime<Utc>) -> ErrorRecord {
        ErrorRecord::from_report(ErrorReport::new(code, "boom").with_tool(tool), now - Duration::minutes(minutes_ago))
    }

    #[test]
    fn test_report_uses_default_severity() {
        let report = ErrorReport::new(ErrorCode::CleanupError, "x");
        assert_eq!(report.severity, ErrorSeverity::Medium);
        let report = report.with_severity(ErrorSeverity::Critical);
        assert_eq!(report.severity, ErrorSeverity::Critical);
    }

    #[test]
    fn test_filter_newest_first_with_limit() {
        let now = Utc::now();
        let records = vec![
            record(ErrorCode::ExecutionTimeout, "a", 3, now),
            record(ErrorCode::ToolError, "b", 2, now),
            record(ErrorCode::ExecutionTimeout, "a", 1, now),
        ];
        let out = ErrorFilter::default().tool("a").apply(records.iter());
        assert_eq!(out.len(), 2);
        assert!(out[0].timestamp > out[1].timestamp);

        let out = ErrorFilter::default().limit(1).apply(records.iter());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, ErrorCode::ExecutionTimeout);
    }

    #[test]
    fn test_filter_by_code_and_since() {
        let now = Utc::now();
        let records = vec![
            record(ErrorCode::ToolError, "a", 10, now),
            record(ErrorCode::ToolError, "a", 1, now),
        ];
        let out = ErrorFilter::default()
            .code(ErrorCode::ToolError)
            .since(now - Duration::minutes(5))
            .apply(records.iter());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_stats() {
        let now = Utc::now();
        let records = vec![
            record(ErrorCode::ShutdownError, "a", 45, now),
            record(ErrorCode::ShutdownError, "a", 5, now),
            record(ErrorCode::ToolError, "b", 1, now),
        ];
        let stats = ErrorStats::compute(records.iter(), now, Duration::minutes(30));
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_severity["critical"], 2);
        assert_eq!(stats.by_severity["low"], 0);
        assert_eq!(stats.by_code["ToolError"], 1);
        assert_eq!(stats.critical_in_window, 1);
        assert_eq!(stats.most_recent, Some(now - Duration::minutes(1)));
    }
}
