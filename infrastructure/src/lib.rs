//! Infrastructure layer for toolcell
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer, plus configuration and manifest loading.

pub mod config;
pub mod docker;
pub mod logging;
pub mod manifest;

// Re-export commonly used types
pub use config::{ConfigError, ConfigLoader, ConfigSource, FileConfig, FileOutputConfig, SourceKind};
pub use docker::{DockerCliRuntime, DockerSettings};
pub use logging::JsonlEventLogger;
pub use manifest::{ManifestError, ManifestLoader, order_by_dependencies};
