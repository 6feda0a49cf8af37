//! Tool domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Parameter name the scheduler always injects with the step's output directory.
pub const OUT_DIR_PARAM: &str = "out_dir";
/// The step's working directory; its output directory lives below it
pub const WORK_DIR_PARAM: &str = "work_dir";
pub const TASK_UID_PARAM: &str = "task_uid";
pub const STEP_NUMBER_PARAM: &str = "step_number";

/// Names a tool may declare as `filled_by: scheduler`
pub const SCHEDULER_PARAMS: &[&str] = &[
    OUT_DIR_PARAM,
    WORK_DIR_PARAM,
    TASK_UID_PARAM,
    STEP_NUMBER_PARAM,
];

/// Catalog entry for one executable capability
///
/// Immutable once loaded. The parameter list is ordered as declared by the tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

/// Declared parameter of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    #[serde(default)]
    pub is_list: bool,
    #[serde(default)]
    pub filled_by: FilledBy,
    #[serde(default)]
    pub allow_ref: bool,
    #[serde(default)]
    pub ref_kinds: BTreeSet<RefKindTag>,
    /// Marks the parameter whose resolved path becomes the run's input directory
    #[serde(default)]
    pub input: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Int,
    Float,
    Bool,
    String,
    Path,
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamType::Int => write!(f, "int"),
            ParamType::Float => write!(f, "float"),
            ParamType::Bool => write!(f, "bool"),
            ParamType::String => write!(f, "string"),
            ParamType::Path => write!(f, "path"),
        }
    }
}

/// Who is allowed to supply a parameter value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilledBy {
    #[default]
    Agent,
    Scheduler,
}

/// Discriminant of [`crate::domain::reference::RefKind`], used in parameter specs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKindTag {
    Dataset,
    StepOutput,
    Filesystem,
}

impl std::fmt::Display for RefKindTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefKindTag::Dataset => write!(f, "dataset"),
            RefKindTag::StepOutput => write!(f, "step_output"),
            RefKindTag::Filesystem => write!(f, "filesystem"),
        }
    }
}

impl ToolSpec {
    /// Looks up a declared parameter by name
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Parameters the planning agent is expected to fill, in declaration order
    pub fn agent_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params
            .iter()
            .filter(|p| p.filled_by == FilledBy::Agent)
    }

    /// Parameters supplied by the scheduler at launch, in declaration order
    pub fn scheduler_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params
            .iter()
            .filter(|p| p.filled_by == FilledBy::Scheduler)
    }

    /// The parameter carrying the step's input source, if the tool declares one
    pub fn input_param(&self) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.input)
    }

    /// Keys that must never appear in agent-produced arguments
    pub fn reserved_keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self
            .params
            .iter()
            .filter(|p| p.filled_by == FilledBy::Scheduler)
            .map(|p| p.name.clone())
            .collect();
        keys.insert(OUT_DIR_PARAM.to_string());
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, filled_by: FilledBy) -> ParamSpec {
        ParamSpec {
            name: name.to_string(),
            param_type: ParamType::String,
            required: false,
            is_list: false,
            filled_by,
            allow_ref: false,
            ref_kinds: BTreeSet::new(),
            input: false,
            description: None,
        }
    }

    #[test]
    fn test_reserved_keys_include_out_dir_and_scheduler_params() {
        let tool = ToolSpec {
            name: "convert".to_string(),
            description: "Convert".to_string(),
            params: vec![
                param("format", FilledBy::Agent),
                param("work_dir", FilledBy::Scheduler),
            ],
        };

        let reserved = tool.reserved_keys();
        assert!(reserved.contains("out_dir"));
        assert!(reserved.contains("work_dir"));
        assert!(!reserved.contains("format"));
        assert_eq!(tool.agent_params().count(), 1);
    }

    #[test]
    fn test_param_spec_defaults_from_json() {
        let spec: ParamSpec =
            serde_json::from_str(r#"{"name": "level", "type": "int", "required": true}"#).unwrap();
        assert_eq!(spec.param_type, ParamType::Int);
        assert_eq!(spec.filled_by, FilledBy::Agent);
        assert!(!spec.is_list);
        assert!(!spec.allow_ref);
        assert!(spec.ref_kinds.is_empty());
    }
}
