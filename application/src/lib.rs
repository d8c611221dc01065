//! Application layer for toolcell
//!
//! This crate contains the engine services, the container runtime port, the
//! event bus, and engine configuration. It depends only on the domain layer.

pub mod config;
pub mod events;
pub mod ports;
pub mod use_cases;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{
    EngineConfig, ErrorLedgerConfig, HealthGate, IoThrottle, MonitorConfig, ResourceConfig,
    SandboxConfig, SchedulerConfig, VolumeConfig,
};
pub use events::{EventBus, SystemEvent};
pub use ports::{
    container_runtime::{
        CapturedOutput, ContainerRuntime, ContainerState, DeviceThrottle, Hardening, LaunchSpec,
        Mount, MountSource, RuntimeError, VolumeInfo,
    },
    event_logger::{EventLogger, NoEventLogger, spawn_event_logger},
};
pub use use_cases::container_monitor::{ContainerMonitor, PollOutcome};
pub use use_cases::error_handler::ErrorHandler;
pub use use_cases::resource_manager::{PoolUsage, ResourceManager, ResourceUsage};
pub use use_cases::sandbox_runner::{ExecutionContext, SandboxError, SandboxRunner};
pub use use_cases::tool_system::{SystemStatus, ToolRegistry, ToolSystem, ToolSystemError};
pub use use_cases::volume_manager::{AcquiredVolume, CleanupReport, VolumeError, VolumeManager};
