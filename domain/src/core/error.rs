//! Error taxonomy shared by every layer.
//!
//! Errors are classified by a stable [`ErrorCode`] rather than by Rust type:
//! each layer keeps its own `thiserror` enum, and every variant maps onto one
//! of these codes when it is recorded in the error ledger or surfaced in an
//! execution result.

use serde::{Deserialize, Serialize};

/// Severity tier of a recorded error.
///
/// Ordering is meaningful: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }

    pub fn all() -> [ErrorSeverity; 4] {
        [
            ErrorSeverity::Low,
            ErrorSeverity::Medium,
            ErrorSeverity::High,
            ErrorSeverity::Critical,
        ]
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(ErrorSeverity::Low),
            "medium" => Ok(ErrorSeverity::Medium),
            "high" => Ok(ErrorSeverity::High),
            "critical" => Ok(ErrorSeverity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Stable error codes.
///
/// | Code | Raised when | Surfaced to |
/// |------|-------------|-------------|
/// | `ToolNotFound` | executing an unregistered tool | caller |
/// | `InvalidTool` | registration with missing metadata or entrypoint | caller |
/// | `MissingDependency` | a declared dependency is not registered | caller |
/// | `DuplicateTool` | registering an ID twice | caller |
/// | `SystemUnstable` | circuit breaker open | caller |
/// | `InsufficientResources` | allocation would break the reservation margin | caller |
/// | `ShuttingDown` | submission after shutdown started | caller |
/// | `ExecutionTimeout` | wall-clock limit exceeded | failed result |
/// | `ContainerLaunchFailed` | runtime refused to start the sandbox | failed result |
/// | `HealthCheckFailed` | exit 0 but the health probe is not healthy | failed result |
/// | `ExecutionFailed` | non-zero exit without an error file, or missing output | failed result |
/// | `ToolError` | the tool wrote `error.json` | failed result |
/// | `OutputParseFailed` | `output.json` / `error.json` is not valid JSON | failed result |
/// | `VolumeError` | volume create/seed/extract failure | failed result |
/// | `MonitorError` | liveness or stats poll failure | ledger only |
/// | `CleanupError` | maintenance failure | ledger only |
/// | `ShutdownError` | final cleanup failure | shutdown caller |
/// | `RuntimeError` | runtime CLI unavailable or misbehaving | ledger / caller |
/// | `Internal` | scheduler task lost | caller |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ToolNotFound,
    InvalidTool,
    MissingDependency,
    DuplicateTool,
    SystemUnstable,
    InsufficientResources,
    ShuttingDown,
    ExecutionTimeout,
    ContainerLaunchFailed,
    HealthCheckFailed,
    ExecutionFailed,
    ToolError,
    OutputParseFailed,
    VolumeError,
    MonitorError,
    CleanupError,
    ShutdownError,
    RuntimeError,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ToolNotFound => "ToolNotFound",
            ErrorCode::InvalidTool => "InvalidTool",
            ErrorCode::MissingDependency => "MissingDependency",
            ErrorCode::DuplicateTool => "DuplicateTool",
            ErrorCode::SystemUnstable => "SystemUnstable",
            ErrorCode::InsufficientResources => "InsufficientResources",
            ErrorCode::ShuttingDown => "ShuttingDown",
            ErrorCode::ExecutionTimeout => "ExecutionTimeout",
            ErrorCode::ContainerLaunchFailed => "ContainerLaunchFailed",
            ErrorCode::HealthCheckFailed => "HealthCheckFailed",
            ErrorCode::ExecutionFailed => "ExecutionFailed",
            ErrorCode::ToolError => "ToolError",
            ErrorCode::OutputParseFailed => "OutputParseFailed",
            ErrorCode::VolumeError => "VolumeError",
            ErrorCode::MonitorError => "MonitorError",
            ErrorCode::CleanupError => "CleanupError",
            ErrorCode::ShutdownError => "ShutdownError",
            ErrorCode::RuntimeError => "RuntimeError",
            ErrorCode::Internal => "Internal",
        }
    }

    /// Severity used when an error with this code is recorded without an
    /// explicit override.
    pub fn default_severity(&self) -> ErrorSeverity {
        match self {
            ErrorCode::ToolNotFound
            | ErrorCode::InvalidTool
            | ErrorCode::MissingDependency
            | ErrorCode::DuplicateTool
            | ErrorCode::ShuttingDown => ErrorSeverity::Low,
            ErrorCode::InsufficientResources
            | ErrorCode::ToolError
            | ErrorCode::MonitorError
            | ErrorCode::CleanupError => ErrorSeverity::Medium,
            ErrorCode::SystemUnstable
            | ErrorCode::ExecutionTimeout
            | ErrorCode::ContainerLaunchFailed
            | ErrorCode::HealthCheckFailed
            | ErrorCode::ExecutionFailed
            | ErrorCode::OutputParseFailed
            | ErrorCode::VolumeError
            | ErrorCode::RuntimeError => ErrorSeverity::High,
            ErrorCode::ShutdownError | ErrorCode::Internal => ErrorSeverity::Critical,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Low < ErrorSeverity::Medium);
        assert!(ErrorSeverity::High < ErrorSeverity::Critical);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("CRITICAL".parse::<ErrorSeverity>(), Ok(ErrorSeverity::Critical));
        assert!("fatal".parse::<ErrorSeverity>().is_err());
    }

    #[test]
    fn test_code_serializes_as_name() {
        let json = serde_json::to_string(&ErrorCode::ExecutionTimeout).unwrap();
        assert_eq!(json, "\"ExecutionTimeout\"");
        assert_eq!(ErrorCode::ExecutionTimeout.to_string(), "ExecutionTimeout");
    }

    #[test]
    fn test_default_severity_tiers() {
        assert_eq!(ErrorCode::CleanupError.default_severity(), ErrorSeverity::Medium);
        assert_eq!(ErrorCode::ExecutionTimeout.default_severity(), ErrorSeverity::High);
        assert_eq!(ErrorCode::ShutdownError.default_severity(), ErrorSeverity::Critical);
    }
}
