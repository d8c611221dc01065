//! Domain layer for toolcell
//!
//! This crate contains the pure types and rules of the sandboxed execution
//! engine. It has no dependencies on infrastructure, async runtimes, or
//! presentation concerns.
//!
//! # Core Concepts
//!
//! ## Tools
//!
//! A [`Tool`] is an opaque unit of execution: a [`ToolDefinition`] (identity,
//! declared resources, schema, dependencies) plus a [`ToolExecutable`]
//! (container image and command). One dispatch of a tool is an *execution*,
//! identified by a fresh [`ExecutionId`].
//!
//! ## Resources
//!
//! Host capacity is tracked in four [`ResourcePools`] (CPU, memory, storage,
//! network). Admission keeps a reservation margin of every pool free; see
//! [`ResourcePools::check_admission`].
//!
//! ## Error ledger
//!
//! Failures are classified by [`ErrorCode`] and [`ErrorSeverity`] and
//! recorded as [`ErrorRecord`]s. Recent critical records trip a global
//! circuit breaker.

pub mod config;
pub mod core;
pub mod ledger;
pub mod monitor;
pub mod resource;
pub mod tool;
pub mod util;

// Re-export commonly used types
pub use config::{ConfigIssue, ConfigIssueCode, OutputFormat, Severity};
pub use core::error::{ErrorCode, ErrorSeverity};
pub use ledger::{ErrorFilter, ErrorRecord, ErrorReport, ErrorStats};
pub use monitor::{
    ContainerStats, ContainerWarning, HealthStatus, MonitorState, MonitorThresholds, MonitoredContainer,
    WarningMetric,
};
pub use resource::{
    ExecutionId, ResourceAllocation, ResourceAmounts, ResourceError, ResourceKind, ResourcePool, ResourcePools,
    ResourceRequirements, ResourceUnitError, parse_cpu, parse_size_mb,
};
pub use tool::{
    entities::{INPUT_FILE, NETWORK_PERMISSION, Tool, ToolDefinition, ToolExecutable, ToolSchema},
    traits::{DefaultToolValidator, ToolValidator},
    value_objects::{ExecutionError, ExecutionMetadata, ToolExecutionResult},
};
