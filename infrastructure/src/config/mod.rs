//! Configuration file loading for toolcell
//!
//! This module handles file I/O and merging of configuration from multiple sources.
//! The priority order (highest to lowest):
//!
//! 1. `TOOLCELL_*` environment variables
//! 2. `--config <path>` specified file
//! 3. Project root: `./toolcell.toml` or `./.toolcell.toml`
//! 4. XDG config: `$XDG_CONFIG_HOME/toolcell/config.toml`
//! 5. Default values

mod file_config;
mod loader;

pub use file_config::{
    FileConfig, FileDockerConfig, FileErrorsConfig, FileLoggingConfig, FileMonitorConfig, FileOutputConfig,
    FileResourcesConfig, FileSandboxConfig, FileSchedulerConfig, FileVolumesConfig,
};
pub use loader::{ConfigError, ConfigLoader, ConfigSource, ENV_PREFIX, SourceKind};
