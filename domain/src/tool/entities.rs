//! Tool domain entities: definitions, executables, and the runtime handle
//!
//! A [`Tool`] pairs an immutable [`ToolDefinition`] (what the tool is and what
//! it needs) with a [`ToolExecutable`] (how to run it inside a sandbox).
//!
//! ```text
//! Tool
//! ├── definition: ToolDefinition   (id, version, resources, schema, deps…)
//! ├── executable: ToolExecutable   (image, command, files, env)
//! └── persistent_files             (seeded into a volume on first use)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::ResourceRequirements;

/// Permission that grants the sandbox a network interface.
pub const NETWORK_PERMISSION: &str = "network";

/// Name of the input payload in the sandbox input directory; reserved.
pub const INPUT_FILE: &str = "input.json";

/// Input/output JSON schema pair.
///
/// Stored verbatim; validation against it is performed by an external
/// component before dispatch, if at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: serde_json::Value,
}

/// Static, immutable descriptor of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique, stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Semantic version
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Linux capabilities re-added after `--cap-drop ALL` (subject to the
    /// configured allow-list)
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Host environment variable names forwarded into the sandbox
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub schema: ToolSchema,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Other tool IDs → version constraint. Only presence is enforced.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Per-tool wall-clock limit, overriding the engine default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ToolDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
            resources: ResourceRequirements::default(),
            permissions: Vec::new(),
            capabilities: Vec::new(),
            environment: Vec::new(),
            schema: ToolSchema::default(),
            tags: Vec::new(),
            dependencies: BTreeMap::new(),
            timeout_secs: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>, constraint: impl Into<String>) -> Self {
        self.dependencies.insert(id.into(), constraint.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn wants_network(&self) -> bool {
        self.has_permission(NETWORK_PERMISSION)
    }
}

/// How a tool is run: a container image, an argv, and files staged next to
/// `input.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutable {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    /// Relative path → content, written into the read-only input directory
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    /// Fixed environment values
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ToolExecutable {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// A tool can only be executed when it names an image and a command.
    pub fn is_executable(&self) -> bool {
        !self.image.trim().is_empty() && self.command.iter().any(|c| !c.trim().is_empty())
    }
}

/// Runtime handle owned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub definition: ToolDefinition,
    pub executable: ToolExecutable,
    /// Relative path → initial content, seeded into the tool's volume on
    /// first creation only
    #[serde(default)]
    pub persistent_files: BTreeMap<String, String>,
}

impl Tool {
    pub fn new(definition: ToolDefinition, executable: ToolExecutable) -> Self {
        Self {
            definition,
            executable,
            persistent_files: BTreeMap::new(),
        }
    }

    pub fn with_persistent_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.persistent_files.insert(path.into(), content.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn needs_volume(&self) -> bool {
        !self.persistent_files.is_empty()
    }
}
