//! Use cases
//!
//! The six engine services, leaves first.

pub mod container_monitor;
pub mod error_handler;
pub mod resource_manager;
pub mod sandbox_runner;
pub mod tool_system;
pub mod volume_manager;
