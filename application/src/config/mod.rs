//! Application-level configuration.
//!
//! This module provides the typed settings each service is constructed with:
//!
//! - [`EngineConfig`]: container grouping every section below
//! - [`SchedulerConfig`]: concurrency ceiling and maintenance interval
//! - [`ResourceConfig`]: host capacity and reservation margin
//! - [`SandboxConfig`]: working directories, timeouts, hardening, health gating
//! - [`MonitorConfig`]: poll interval and warning thresholds
//! - [`VolumeConfig`]: naming prefix, persistence, eviction cap
//! - [`ErrorLedgerConfig`]: ledger capacity and circuit-breaker window

pub mod engine_config;
pub mod health_gate;

pub use engine_config::{
    EngineConfig, ErrorLedgerConfig, IoThrottle, MonitorConfig, ResourceConfig, SandboxConfig, SchedulerConfig,
    VolumeConfig,
};
pub use health_gate::HealthGate;
