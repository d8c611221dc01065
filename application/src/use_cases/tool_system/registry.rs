//! Tool registry owned by the scheduler task.

use std::collections::HashMap;
use std::sync::Arc;

use toolcell_domain::{DefaultToolValidator, Tool, ToolDefinition, ToolValidator};

use super::ToolSystemError;

pub struct ToolRegistry {
    tools: HashMap<String, Arc<Tool>>,
    validator: Box<dyn ToolValidator + Send>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(Box::new(DefaultToolValidator))
    }
}

impl ToolRegistry {
    pub fn new(validator: Box<dyn ToolValidator + Send>) -> Self {
        Self {
            tools: HashMap::new(),
            validator,
        }
    }

    /// Add a tool.
    ///
    /// Checked in order: metadata and executable unit, resource strings,
    /// duplicate ID, then presence of every declared dependency. Version
    /// constraints on dependencies are not evaluated.
    pub fn register(&mut self, tool: Tool) -> Result<Arc<Tool>, ToolSystemError> {
        self.validator
            .validate(&tool)
            .map_err(ToolSystemError::InvalidTool)?;
        tool.definition.resources.to_amounts().map_err(|e| {
            ToolSystemError::InvalidTool(format!("Tool '{}' has invalid resources: {}", tool.id(), e))
        })?;

        if self.tools.contains_key(tool.id()) {
            return Err(ToolSystemError::DuplicateTool(tool.id().to_string()));
        }

        if let Some(missing) = tool
            .definition
            .dependencies
            .keys()
            .find(|dep| !self.tools.contains_key(dep.as_str()))
        {
            return Err(ToolSystemError::MissingDependency {
                tool_id: tool.id().to_string(),
                dependency: missing.clone(),
            });
        }

        let tool = Arc::new(tool);
        self.tools.insert(tool.id().to_string(), tool.clone());
        Ok(tool)
    }

    pub fn unregister(&mut self, tool_id: &str) -> Option<Arc<Tool>> {
        self.tools.remove(tool_id)
    }

    pub fn get(&self, tool_id: &str) -> Option<Arc<Tool>> {
        self.tools.get(tool_id).cloned()
    }

    /// Registered definitions sorted by ID.
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
