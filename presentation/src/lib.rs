//! Presentation layer for toolcell
//!
//! This crate contains CLI definitions, output formatters,
//! and progress reporters.

pub mod cli;
pub mod output;
pub mod progress;

// Re-export commonly used types
pub use cli::commands::{Cli, Command, ConfigCommand, OutputArg, RunArgs, VolumesCommand};
pub use output::console::{ConsoleFormatter, set_color};
pub use output::formatter::OutputFormatter;
pub use progress::reporter::{NoProgress, ProgressNotifier, ProgressReporter, SimpleProgress, spawn_progress};
