//! Configuration file loader with multi-source merging

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use thiserror::Error;
use toolcell_domain::ConfigIssue;

use super::file_config::FileConfig;

const APP_DIR: &str = "toolcell";
const PROJECT_FILES: [&str; 2] = ["toolcell.toml", ".toolcell.toml"];
pub const ENV_PREFIX: &str = "TOOLCELL_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration:\n{}", format_issues(.0))]
    Invalid(Vec<ConfigIssue>),
}

fn format_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Kind of a configuration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Defaults,
    Global,
    Project,
    Explicit,
    Environment,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Defaults => "Default",
            SourceKind::Global => "Global",
            SourceKind::Project => "Project",
            SourceKind::Explicit => "Explicit",
            SourceKind::Environment => "Env",
        }
    }
}

/// One configuration layer, lowest priority first.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSource {
    pub kind: SourceKind,
    /// File path, or the variable names for the environment layer
    pub location: String,
    pub found: bool,
}

/// Configuration loader that handles file discovery and merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from all sources with proper priority
    ///
    /// Priority (highest to lowest):
    /// 1. `TOOLCELL_*` environment variables (`__` separates sections)
    /// 2. Explicit config path (if provided; must exist)
    /// 3. Project root: `./toolcell.toml` or `./.toolcell.toml`
    /// 4. Global: `$XDG_CONFIG_HOME/toolcell/config.toml`
    /// 5. Default values
    pub fn load(config_path: Option<&Path>) -> Result<FileConfig, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(FileConfig::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            figment = figment.merge(Toml::file(&global_path));
        }

        if let Some(project_path) = Self::project_config_path() {
            figment = figment.merge(Toml::file(project_path));
        }

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Load only default configuration (for --no-config)
    pub fn load_defaults() -> FileConfig {
        FileConfig::default()
    }

    /// Load, then reject configurations with error-severity issues.
    ///
    /// Returns the warnings alongside the config.
    pub fn load_validated(config_path: Option<&Path>) -> Result<(FileConfig, Vec<ConfigIssue>), ConfigError> {
        let config = Self::load(config_path)?;
        let issues = config.validate();
        if issues.iter().any(ConfigIssue::is_error) {
            return Err(ConfigError::Invalid(issues));
        }
        Ok((config, issues))
    }

    /// `$XDG_CONFIG_HOME/toolcell/config.toml` (platform config dir elsewhere)
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    /// Get the project-level config file path (if it exists)
    pub fn project_config_path() -> Option<PathBuf> {
        PROJECT_FILES.iter().map(PathBuf::from).find(|p| p.exists())
    }

    /// Every layer [`load`](Self::load) consults, lowest priority first.
    pub fn sources(config_path: Option<&Path>) -> Vec<ConfigSource> {
        let mut sources = vec![ConfigSource {
            kind: SourceKind::Defaults,
            location: "built-in defaults".to_string(),
            found: true,
        }];

        if let Some(path) = Self::global_config_path() {
            sources.push(ConfigSource {
                kind: SourceKind::Global,
                found: path.exists(),
                location: path.display().to_string(),
            });
        }

        sources.push(match Self::project_config_path() {
            Some(path) => ConfigSource {
                kind: SourceKind::Project,
                location: path.display().to_string(),
                found: true,
            },
            None => ConfigSource {
                kind: SourceKind::Project,
                location: PROJECT_FILES.map(|f| format!("./{}", f)).join(" or "),
                found: false,
            },
        });

        if let Some(path) = config_path {
            sources.push(ConfigSource {
                kind: SourceKind::Explicit,
                location: path.display().to_string(),
                found: path.exists(),
            });
        }

        let mut vars: Vec<String> = std::env::vars()
            .map(|(k, _)| k)
            .filter(|k| k.starts_with(ENV_PREFIX))
            .collect();
        vars.sort();
        sources.push(ConfigSource {
            kind: SourceKind::Environment,
            found: !vars.is_empty(),
            location: if vars.is_empty() {
                format!("{}*", ENV_PREFIX)
            } else {
                vars.join(", ")
            },
        });

        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use toolcell_domain::ConfigIssueCode;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_defaults() {
        let config = ConfigLoader::load_defaults();
        assert_eq!(config.scheduler.max_concurrent_executions, 5);
        assert!(config.volumes.persistent);
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let file = write_config("[volumes]\nmax_volumes = 3\n\n[sandbox]\ntimeout_secs = 9\n");
        let config = ConfigLoader::load(Some(file.path())).unwrap();
        assert_eq!(config.volumes.max_volumes, 3);
        assert_eq!(config.sandbox.timeout_secs, 9);
        assert_eq!(config.volumes.prefix, "toolcell-vol");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = ConfigLoader::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_validated_rejects_errors() {
        let file = write_config("[scheduler]\nmax_concurrent_executions = 0\n");
        match ConfigLoader::load_validated(Some(file.path())) {
            Err(ConfigError::Invalid(issues)) => {
                assert_eq!(issues[0].code, ConfigIssueCode::ZeroConcurrency);
            }
            other => panic!("expected invalid config, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_global_config_path_returns_some() {
        let path = ConfigLoader::global_config_path().unwrap();
        assert!(path.ends_with("toolcell/config.toml"));
    }

    #[test]
    fn test_sources_lists_explicit_layer() {
        let file = write_config("");
        let sources = ConfigLoader::sources(Some(file.path()));
        assert_eq!(sources.first().unwrap().kind, SourceKind::Defaults);
        assert_eq!(sources.last().unwrap().kind, SourceKind::Environment);
        let explicit = sources.iter().find(|s| s.kind == SourceKind::Explicit).unwrap();
        assert!(explicit.found);
    }
}
