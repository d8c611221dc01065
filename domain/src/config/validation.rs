//! Configuration validation issues.
//!
//! Raw configuration is checked before it is turned into engine settings.
//! Each problem becomes a [`ConfigIssue`]; `Error` issues abort startup,
//! `Warning` issues are logged and ignored.

use std::fmt;

/// Severity level of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Fatal: the configuration cannot work at all.
    Error,
    /// Non-fatal: the configuration works but may not behave as expected.
    Warning,
}

/// Identifies a specific configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigIssueCode {
    /// `scheduler.max_concurrent_executions` is zero.
    ZeroConcurrency,
    /// `resources.reservation_margin` is outside `[0, 1)`.
    MarginOutOfRange,
    /// A capacity total is zero or negative.
    NonPositiveCapacity,
    /// A resource string could not be parsed.
    InvalidResourceValue,
    /// A poll or maintenance interval is zero.
    ZeroInterval,
    /// A monitor threshold is outside `(0, 100]`.
    ThresholdOutOfRange,
    /// `errors.capacity` is zero.
    ZeroLedgerCapacity,
    /// An unknown enum value (e.g. health gate) was given.
    UnknownValue,
    /// A timeout of zero disables nothing and kills every execution.
    ZeroTimeout,
}

/// A detected issue in the configuration.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: Severity,
    pub code: ConfigIssueCode,
    /// Dotted key the issue is about (e.g. `"scheduler.max_concurrent_executions"`)
    pub key: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn error(code: ConfigIssueCode, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn warning(code: ConfigIssueCode, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", tag, self.key, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let issue = ConfigIssue::error(
            ConfigIssueCode::ZeroConcurrency,
            "scheduler.max_concurrent_executions",
            "must be at least 1",
        );
        assert!(issue.is_error());
        assert_eq!(
            issue.to_string(),
            "error: scheduler.max_concurrent_executions: must be at least 1"
        );
    }
}
