//! Tool registry
//!
//! Tools are loaded from a JSON file holding an array of definitions:
//!
//! ```json
//! [
//!   {
//!     "name": "ingest",
//!     "description": "Copies raw files.\n```params\n[...]\n```",
//!     "command": ["python3", "/opt/tools/ingest.py"],
//!     "env": {"PYTHONUNBUFFERED": "1"}
//!   }
//! ]
//! ```
//!
//! Every description must carry a parseable parameter block; the parsed
//! [`ToolSpec`] is kept beside the definition for the lifetime of the registry.

use conduit_core::domain::tool::ToolSpec;
use conduit_core::spec_block::parse_tool_spec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

use crate::error::RegistryError;

/// How to launch one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Program followed by its fixed arguments
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct RegisteredTool {
    definition: ToolDefinition,
    spec: ToolSpec,
}

/// Explicit, passed-in set of launchable tools
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and validates every definition in a tools file
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let definitions: Vec<ToolDefinition> =
            serde_json::from_str(&raw).map_err(|source| RegistryError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let registry = Self::from_definitions(definitions)?;
        info!(
            "Loaded {} tool(s) from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ToolDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Adds a tool, rejecting duplicates and unparseable parameter blocks
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::Duplicate(definition.name));
        }
        if definition.command.is_empty() || definition.command[0].trim().is_empty() {
            return Err(RegistryError::EmptyCommand(definition.name));
        }

        let spec = parse_tool_spec(&definition.name, &definition.description)?;
        debug!(
            tool = %definition.name,
            params = spec.params.len(),
            "Registered tool"
        );

        self.tools
            .insert(definition.name.clone(), RegisteredTool { definition, spec });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool specs, ordered by name
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec.clone()).collect()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn definition(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: "Echo.\n```params\n[{\"name\": \"msg\", \"type\": \"string\", \"required\": false}]\n```".to_string(),
            command: vec!["echo".to_string()],
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ToolRegistry::from_definitions(vec![definition("b"), definition("a")]).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert_eq!(registry.spec("a").unwrap().params[0].name, "msg");
        assert_eq!(registry.spec("a").unwrap().description, "Echo.");

        let names: Vec<_> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = ToolRegistry::from_definitions(vec![definition("a"), definition("a")]).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "a"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut def = definition("a");
        def.command.clear();
        let err = ToolRegistry::new().register(def).unwrap_err();
        assert!(matches!(err, RegistryError::EmptyCommand(_)));
    }

    #[test]
    fn test_missing_param_block_rejected() {
        let mut def = definition("a");
        def.description = "No block here".to_string();
        let err = ToolRegistry::new().register(def).unwrap_err();
        assert!(matches!(err, RegistryError::SpecBlock(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let defs = vec![definition("echo")];
        write!(file, "{}", serde_json::to_string(&defs).unwrap()).unwrap();

        let registry = ToolRegistry::from_file(file.path()).unwrap();
        assert_eq!(registry.get("echo").unwrap().command, vec!["echo"]);
    }

    #[test]
    fn test_from_file_reports_path() {
        let err = ToolRegistry::from_file(Path::new("/nonexistent/tools.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tools.json"));
    }
}
