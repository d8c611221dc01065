//! CLI entrypoint for toolcell
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

mod telemetry;

use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use toolcell_application::{ContainerRuntime, EventBus, ToolSystem, VolumeManager, spawn_event_logger};
use toolcell_domain::{OutputFormat, Tool};
use toolcell_infrastructure::{
    ConfigError, ConfigLoader, DockerCliRuntime, FileConfig, JsonlEventLogger, ManifestLoader,
    order_by_dependencies,
};
use toolcell_presentation::{
    Cli, Command, ConfigCommand, ConsoleFormatter, NoProgress, OutputFormatter, ProgressNotifier,
    ProgressReporter, RunArgs, SimpleProgress, VolumesCommand, set_color, spawn_progress,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // `config sources` stays usable when a file fails to parse
    let loaded = if cli.no_config {
        Ok(ConfigLoader::load_defaults())
    } else {
        ConfigLoader::load(cli.config.as_deref())
    };
    let file_config = match (&cli.command, loaded) {
        (_, Ok(config)) => config,
        (Command::Config(ConfigCommand::Sources), Err(_)) => FileConfig::default(),
        (_, Err(e)) => return Err(e.into()),
    };

    let _log_guard = telemetry::init(&telemetry::LogOptions {
        verbose: cli.verbose,
        json: cli.json_logs || file_config.logging.json,
        dir: cli.log_dir.clone().or_else(|| file_config.logging.dir.clone()),
        level: file_config.logging.level.clone(),
    });

    set_color(file_config.output.color);

    match &cli.command {
        Command::Config(cmd) => config_command(&cli, cmd, &file_config),
        Command::Check => check(&file_config).await,
        Command::Volumes(cmd) => volumes_command(cmd, &file_config).await,
        Command::Run(args) => run(&cli, args, &file_config).await,
    }
}

fn config_command(cli: &Cli, cmd: &ConfigCommand, config: &FileConfig) -> Result<ExitCode> {
    match cmd {
        ConfigCommand::Show => {
            print!("{}", toml::to_string_pretty(config).context("serializing configuration")?);
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::Sources => {
            if cli.no_config {
                println!("Configuration files disabled (--no-config)");
                return Ok(ExitCode::SUCCESS);
            }
            for source in ConfigLoader::sources(cli.config.as_deref()) {
                let mark = if source.found { "found" } else { "missing" };
                println!("{:<8} {:<8} {}", source.kind.as_str(), mark, source.location);
            }
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::Validate => {
            let issues = config.validate();
            print!("{}", ConsoleFormatter::format_issues(&issues));
            if issues.iter().any(|i| i.is_error()) {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

/// Engine settings, refusing to start on error-severity issues.
fn engine_config(config: &FileConfig) -> Result<toolcell_application::EngineConfig> {
    let (engine, issues) = config.to_engine_config();
    for issue in issues.iter().filter(|i| !i.is_error()) {
        warn!("{}", issue);
    }
    if issues.iter().any(|i| i.is_error()) {
        return Err(ConfigError::Invalid(issues).into());
    }
    Ok(engine)
}

fn docker_runtime(config: &FileConfig, sandbox_user: Option<&str>) -> Result<Arc<dyn ContainerRuntime>> {
    let settings = config.docker.to_docker_settings(sandbox_user);
    let runtime = DockerCliRuntime::new(settings)?;
    Ok(Arc::new(runtime))
}

async fn check(config: &FileConfig) -> Result<ExitCode> {
    let runtime = docker_runtime(config, None)?;
    match runtime.ping().await {
        Ok(version) => {
            println!("{} daemon reachable (server {})", runtime.backend_name(), version);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{} daemon unreachable: {}", runtime.backend_name(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn volumes_command(cmd: &VolumesCommand, config: &FileConfig) -> Result<ExitCode> {
    let engine = engine_config(config)?;
    let runtime = docker_runtime(config, engine.sandbox.user.as_deref())?;
    let volumes = VolumeManager::new(runtime, engine.volumes);

    match cmd {
        VolumesCommand::List => {
            let list = volumes.list_volumes().await?;
            print!("{}", ConsoleFormatter::format_volumes(&list, chrono::Utc::now()));
        }
        VolumesCommand::Cleanup => {
            let report = volumes.cleanup_old_volumes().await?;
            print!("{}", ConsoleFormatter::format_cleanup(&report));
            if !report.failed.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        VolumesCommand::Extract { name, dest } => {
            volumes.extract_from_volume(name, dest).await?;
            println!("Extracted {} into {}", name, dest.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Main manifest plus every `--with` manifest, dependencies first, and the
/// ID of the main tool.
fn load_tools(args: &RunArgs) -> Result<(Vec<Tool>, String)> {
    let loader = ManifestLoader::new();
    let mut tools = Vec::new();
    for pattern in &args.with {
        tools.extend(loader.load_glob(pattern)?);
    }
    let main = loader.load(&args.manifest)?;
    // A glob may also have matched the main manifest
    let main_id = main.id().to_string();
    tools.retain(|t| t.id() != main_id);
    tools.push(main);
    Ok((order_by_dependencies(tools)?, main_id))
}

fn read_input(args: &RunArgs) -> Result<serde_json::Value> {
    let raw = match (&args.input, &args.input_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => {
            std::fs::read_to_string(path).with_context(|| format!("reading input file {}", path.display()))?
        }
        (None, None) => return Ok(serde_json::json!({})),
    };
    serde_json::from_str(&raw).context("tool input is not valid JSON")
}

fn progress_for(quiet: bool, format: OutputFormat, tool_id: &str) -> Arc<dyn ProgressNotifier> {
    if quiet || format == OutputFormat::Json {
        Arc::new(NoProgress)
    } else if std::io::stderr().is_terminal() {
        Arc::new(ProgressReporter::new(tool_id))
    } else {
        Arc::new(SimpleProgress)
    }
}

async fn run(cli: &Cli, args: &RunArgs, config: &FileConfig) -> Result<ExitCode> {
    let engine = engine_config(config)?;
    let (tools, target_id) = load_tools(args)?;
    let input = read_input(args)?;

    let runtime = docker_runtime(config, engine.sandbox.user.as_deref())?;
    runtime.ping().await.context("container runtime is not reachable")?;

    let bus = EventBus::new();
    let events_path = cli.events.clone().or_else(|| config.logging.events.clone());
    let event_logger = events_path
        .as_deref()
        .and_then(JsonlEventLogger::open)
        .map(|logger| spawn_event_logger(&bus, logger));

    let format = args
        .output
        .map(OutputFormat::from)
        .unwrap_or_else(|| config.output.format_or_default());
    let progress = progress_for(cli.quiet, format, &target_id);
    let progress_task = spawn_progress(&bus, progress.clone());

    let system = ToolSystem::with_events(engine, runtime, bus);
    for tool in tools {
        let id = tool.id().to_string();
        system
            .register_tool(tool)
            .await
            .with_context(|| format!("registering tool '{}'", id))?;
    }

    info!(tool_id = %target_id, "Executing");
    let result = system.execute_tool(&target_id, input).await;
    progress.on_finish(result.as_ref().is_ok_and(|r| r.success));

    if let Err(e) = system.shutdown().await {
        warn!("Shutdown cleanup failed: {}", e);
    }
    progress_task.abort();
    drop(system);
    if let Some(handle) = event_logger {
        // Ends once the scheduler has released the bus
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    let result = result?;
    let formatter = ConsoleFormatter::new(target_id, config.output.show_streams);
    println!("{}", formatter.render(&result, format).trim_end());

    Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
