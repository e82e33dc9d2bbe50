//! Tool registry for managing available tools

use crate::error::{Result, ToolError};
use crate::handler::ToolHandler;
use crate::types::ToolDef;
use dashmap::DashMap;
use std::sync::Arc;

/// Trait for managing tool registry
pub trait ToolRegistry: Send + Sync {
    /// Register a new tool; a name can only be registered once
    fn register(&self, tool: Arc<dyn ToolHandler>) -> Result<()>;

    /// Unregister a tool by name
    fn unregister(&self, name: &str) -> Result<()>;

    /// Definitions of all registered tools, sorted by name
    fn list(&self) -> Vec<ToolDef>;

    /// Get a tool by name
    fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>>;

    /// Check if a tool is registered
    fn contains(&self, name: &str) -> bool;

    /// Clear all registered tools
    fn clear(&self);
}

/// In-memory tool registry using DashMap for concurrent access
#[derive(Clone, Default)]
pub struct InMemoryToolRegistry {
    tools: Arc<DashMap<String, Arc<dyn ToolHandler>>>,
}

impl InMemoryToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for InMemoryToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry for InMemoryToolRegistry {
    fn register(&self, tool: Arc<dyn ToolHandler>) -> Result<()> {
        let name = tool.definition().name;
        match self.tools.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(ToolError::AlreadyRegistered(entry.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                tracing::debug!("Registered tool: {}", entry.key());
                entry.insert(tool);
                Ok(())
            }
        }
    }

    fn unregister(&self, name: &str) -> Result<()> {
        if self.tools.remove(name).is_none() {
            return Err(ToolError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn list(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self
            .tools
            .iter()
            .map(|entry| entry.value().definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    fn clear(&self) {
        self.tools.clear();
    }
}
