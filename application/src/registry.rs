//! Tool Registry
//!
//! Catalog of registered tools, constructor-injected into the orchestrator.
//! Registration and lookup are safe to interleave across tasks: an entry is
//! inserted under the write lock in one step, so readers never see it half
//! built.

use crate::ports::tool::Tool;
use orchestra_domain::ToolMetadata;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Tool not found: {0}")]
    NotFound(String),
}

#[derive(Default)]
struct Entries {
    /// Registration order
    order: Vec<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

/// Registry of named tools
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<Entries>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        let mut entries = self.write();
        if entries.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        debug!(tool = %name, version = tool.version(), "Registering tool");
        entries.order.push(name.clone());
        entries.tools.insert(name, tool);
        Ok(())
    }

    /// Builder-style registration for wiring code
    pub fn with_tool(self, tool: Arc<dyn Tool>) -> Result<Self, RegistryError> {
        self.register(tool)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.read()
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Metadata of every tool, in registration order
    pub fn list(&self) -> Vec<ToolMetadata> {
        let entries = self.read();
        entries
            .order
            .iter()
            .filter_map(|name| entries.tools.get(name))
            .map(|tool| tool.metadata())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
