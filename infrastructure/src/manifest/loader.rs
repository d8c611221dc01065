//! Manifest parsing.
//!
//! ```toml
//! [tool]
//! id = "calc"
//! name = "Calculator"
//! version = "1.0.0"
//! permissions = []
//!
//! [tool.resources]
//! cpu = "0.1"
//! memory = "128M"
//!
//! [runtime]
//! image = "python:3.12-alpine"
//! command = ["python", "main.py"]
//! timeout_secs = 30
//!
//! [runtime.include]
//! "main.py" = "src/calc.py"   # relative to this manifest
//!
//! [persistent_files]
//! "history.json" = "[]"
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use toolcell_domain::{Tool, ToolDefinition, ToolExecutable};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("manifest {manifest}: cannot include {include}: {source}")]
    Include {
        manifest: PathBuf,
        include: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid glob pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("no manifests match '{0}'")]
    NoMatches(String),

    #[error("tool '{0}' is defined by more than one manifest")]
    Duplicate(String),

    #[error("dependency cycle between tools: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    tool: ToolDefinition,
    runtime: RawRuntime,
    #[serde(default)]
    persistent_files: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuntime {
    image: String,
    #[serde(default)]
    command: Vec<String>,
    timeout_secs: Option<u64>,
    #[serde(default)]
    files: BTreeMap<String, String>,
    /// Target path → source path relative to the manifest
    #[serde(default)]
    include: BTreeMap<String, PathBuf>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestLoader;

impl ManifestLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load one manifest. Included files are read eagerly.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Tool, ManifestError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let tool = self.parse(&text, base).map_err(|e| match e {
            ParseFailure::Toml(message) => ManifestError::Parse {
                path: path.to_path_buf(),
                message,
            },
            ParseFailure::Include { include, source } => ManifestError::Include {
                manifest: path.to_path_buf(),
                include,
                source,
            },
        })?;
        debug!(tool_id = %tool.id(), path = %path.display(), "Loaded manifest");
        Ok(tool)
    }

    /// Load every manifest matching `pattern`, in path order.
    ///
    /// A plain path is a pattern that matches itself.
    pub fn load_glob(&self, pattern: &str) -> Result<Vec<Tool>, ManifestError> {
        let entries = glob::glob(pattern).map_err(|e| ManifestError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries.filter_map(Result::ok).filter(|p| p.is_file()).collect();
        if paths.is_empty() {
            return Err(ManifestError::NoMatches(pattern.to_string()));
        }
        paths.sort();
        paths.iter().map(|p| self.load(p)).collect()
    }

    fn parse(&self, text: &str, base: &Path) -> Result<Tool, ParseFailure> {
        let raw: RawManifest = toml::from_str(text).map_err(|e| ParseFailure::Toml(e.to_string()))?;

        let mut files = raw.runtime.files;
        for (target, source) in raw.runtime.include {
            let full = base.join(&source);
            let content = std::fs::read_to_string(&full).map_err(|source| ParseFailure::Include {
                include: full.clone(),
                source,
            })?;
            files.insert(target, content);
        }

        let mut definition = raw.tool;
        if raw.runtime.timeout_secs.is_some() {
            definition.timeout_secs = raw.runtime.timeout_secs;
        }

        let executable = ToolExecutable {
            image: raw.runtime.image,
            command: raw.runtime.command,
            files,
            env: raw.runtime.env,
        };

        let mut tool = Tool::new(definition, executable);
        tool.persistent_files = raw.persistent_files;
        Ok(tool)
    }
}

enum ParseFailure {
    Toml(String),
    Include { include: PathBuf, source: std::io::Error },
}

/// Order tools so every dependency precedes its dependents.
///
/// Dependencies outside `tools` are assumed to be registered already and are
/// ignored here. Ties keep input order.
pub fn order_by_dependencies(tools: Vec<Tool>) -> Result<Vec<Tool>, ManifestError> {
    let mut seen = HashSet::new();
    for tool in &tools {
        if !seen.insert(tool.id().to_string()) {
            return Err(ManifestError::Duplicate(tool.id().to_string()));
        }
    }

    let index: HashMap<String, usize> = tools.iter().enumerate().map(|(i, t)| (t.id().to_string(), i)).collect();
    let mut pending: Vec<Option<Tool>> = tools.into_iter().map(Some).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while ordered.len() < pending.len() {
        let ready = pending.iter().position(|slot| {
            slot.as_ref().is_some_and(|t| {
                t.definition
                    .dependencies
                    .keys()
                    .all(|dep| placed.contains(dep) || !index.contains_key(dep))
            })
        });

        let Some(i) = ready else {
            let mut stuck: Vec<String> = pending.iter().flatten().map(|t| t.id().to_string()).collect();
            stuck.sort();
            return Err(ManifestError::DependencyCycle(stuck));
        };

        if let Some(tool) = pending[i].take() {
            placed.insert(tool.id().to_string());
            ordered.push(tool);
        }
    }

    Ok(ordered)
}
