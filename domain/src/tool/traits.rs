//! Tool domain traits
//!
//! Contains pure registration checks. Dependency presence is checked by the
//! registry itself since it needs the set of registered IDs.

use std::path::{Component, Path};

use super::entities::{INPUT_FILE, Tool};

/// Validator run against every tool before registration.
pub trait ToolValidator {
    /// Validate a tool's metadata and executable unit
    fn validate(&self, tool: &Tool) -> Result<(), String>;
}

/// Default implementation of ToolValidator
#[derive(Debug, Clone, Default)]
pub struct DefaultToolValidator;

impl ToolValidator for DefaultToolValidator {
    fn validate(&self, tool: &Tool) -> Result<(), String> {
        let def = &tool.definition;

        for (field, value) in [("id", &def.id), ("name", &def.name), ("version", &def.version)] {
            if value.trim().is_empty() {
                return Err(format!("Tool metadata is missing '{}'", field));
            }
        }

        if !tool.executable.is_executable() {
            return Err(format!(
                "Tool '{}' has no executable unit (image and command are required)",
                def.id
            ));
        }

        for path in tool.executable.files.keys().chain(tool.persistent_files.keys()) {
            check_relative_path(path).map_err(|reason| format!("Tool '{}': file '{}' {}", def.id, path, reason))?;
        }

        if let Some(path) = tool.executable.files.keys().find(|p| is_input_file(p)) {
            return Err(format!(
                "Tool '{}': file '{}' would replace the {} payload",
                def.id, path, INPUT_FILE
            ));
        }

        Ok(())
    }
}

/// Staged files must stay inside their target directory.
fn check_relative_path(path: &str) -> Result<(), &'static str> {
    if path.trim().is_empty() {
        return Err("has an empty path");
    }
    let p = Path::new(path);
    if p.is_absolute() {
        return Err("must be a relative path");
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err("must not contain '..'");
    }
    Ok(())
}

/// `input.json`, `./input.json` and the like.
fn is_input_file(path: &str) -> bool {
    let mut parts = Path::new(path)
        .components()
        .filter(|c| !matches!(c, Component::CurDir));
    matches!((parts.next(), parts.next()), (Some(Component::Normal(name)), None) if name == INPUT_FILE)
}
