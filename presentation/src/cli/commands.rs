//! CLI command definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use toolcell_domain::OutputFormat;

/// Output format for execution results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputArg {
    /// Summary with metadata and captured streams
    Full,
    /// The raw result as JSON
    Json,
}

impl From<OutputArg> for OutputFormat {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Full => OutputFormat::Full,
            OutputArg::Json => OutputFormat::Json,
        }
    }
}

/// CLI arguments for toolcell
#[derive(Parser, Debug)]
#[command(name = "toolcell")]
#[command(author, version, about = "Run tools in resource-accounted, hardened container sandboxes")]
#[command(long_about = r#"
toolcell registers tools described by TOML manifests and runs each invocation
inside a throwaway, locked-down container. Executions are admitted against a
host resource budget; persistent per-tool state lives in named volumes.

Configuration files are loaded from (lowest to highest priority):
1. ~/.config/toolcell/config.toml   Global config
2. ./toolcell.toml                  Project-level config
3. --config <path>                  Explicit config file
4. TOOLCELL_<SECTION>__<KEY>        Environment variables

Example:
  toolcell run tools/calc.toml --input '{"a": 1, "b": 2}'
  toolcell run tools/report.toml --with 'tools/lib/*.toml' --output json
  toolcell volumes cleanup
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Also write daily-rolling log files to this directory
    #[arg(long, value_name = "DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Append every engine event to this JSONL file
    #[arg(long, value_name = "PATH", global = true)]
    pub events: Option<PathBuf>,

    /// Suppress progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a tool from its manifest and execute it once
    Run(RunArgs),

    /// Check that the container runtime is reachable
    Check,

    /// Inspect and manage tool volumes
    #[command(subcommand)]
    Volumes(VolumesCommand),

    /// Inspect the effective configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Manifest of the tool to execute
    #[arg(value_name = "MANIFEST")]
    pub manifest: PathBuf,

    /// Additional manifests (paths or glob patterns) registered first, e.g. dependencies
    #[arg(long = "with", value_name = "MANIFEST|GLOB")]
    pub with: Vec<String>,

    /// Tool input as a JSON document
    #[arg(long, value_name = "JSON", conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Read the tool input from a JSON file
    #[arg(long, value_name = "PATH")]
    pub input_file: Option<PathBuf>,

    /// Output format (defaults to `[output] format`, then `full`)
    #[arg(short, long, value_enum)]
    pub output: Option<OutputArg>,
}

#[derive(Subcommand, Debug)]
pub enum VolumesCommand {
    /// List managed volumes
    List,
    /// Remove the oldest volumes beyond the configured cap
    Cleanup,
    /// Copy the contents of a volume into a host directory
    Extract {
        /// Volume name
        name: String,
        /// Destination directory
        dest: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the merged configuration as TOML
    Show,
    /// List configuration files in priority order
    Sources,
    /// Validate the merged configuration
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "toolcell",
            "-vv",
            "run",
            "calc.toml",
            "--with",
            "lib/*.toml",
            "--input",
            r#"{"a":1}"#,
            "--output",
            "json",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(run.manifest, PathBuf::from("calc.toml"));
        assert_eq!(run.with, vec!["lib/*.toml"]);
        assert_eq!(run.input.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(run.output.map(OutputFormat::from), Some(OutputFormat::Json));
    }

    #[test]
    fn test_input_sources_conflict() {
        let result = Cli::try_parse_from(["toolcell", "run", "calc.toml", "--input", "{}", "--input-file", "in.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["toolcell", "volumes", "extract", "toolcell-vol-tool-kv", "./out", "--no-config"]);
        assert!(cli.no_config);
        assert!(matches!(
            cli.command,
            Command::Volumes(VolumesCommand::Extract { ref name, .. }) if name == "toolcell-vol-tool-kv"
        ));
    }
}
