//! Tool parameter block parser
//!
//! Tool descriptions are free text with one embedded, machine-readable block
//! declaring the tool's parameters:
//!
//! ````text
//! Converts raw TIFF stacks into OME-Zarr.
//!
//! ```params
//! [
//!   {"name": "source", "type": "path", "required": true, "allow_ref": true,
//!    "ref_kinds": ["dataset", "step_output", "filesystem"], "input": true},
//!   {"name": "chunk_size", "type": "int", "required": false}
//! ]
//! ```
//! ````
//!
//! The block is removed from the human description returned alongside the spec.

use std::collections::HashSet;
use thiserror::Error;

use crate::domain::tool::{FilledBy, OUT_DIR_PARAM, ParamSpec, SCHEDULER_PARAMS, ToolSpec};

const BLOCK_OPEN: &str = "```params";
const BLOCK_CLOSE: &str = "```";

#[derive(Debug, Error, PartialEq)]
pub enum SpecBlockError {
    #[error("tool '{0}' description has no ```params block")]
    MissingBlock(String),

    #[error("tool '{0}' has an unterminated ```params block")]
    Unterminated(String),

    #[error("tool '{tool}' parameter block is not valid JSON: {reason}")]
    InvalidJson { tool: String, reason: String },

    #[error("tool '{tool}' parameter '{param}': {reason}")]
    InvalidParam {
        tool: String,
        param: String,
        reason: String,
    },

    #[error("tool '{tool}' declares more than one input parameter")]
    MultipleInputs { tool: String },
}

/// Parse a tool spec from its name and full description
///
/// # Errors
/// Returns an error if:
/// - The description has no parameter block, or the block is not closed
/// - The block is not a JSON array of parameter objects
/// - A parameter is declared twice or has an inconsistent reference setup
/// - An agent-filled parameter uses a runtime-reserved name
pub fn parse_tool_spec(name: &str, description: &str) -> Result<ToolSpec, SpecBlockError> {
    let (human, block) = split_block(name, description)?;

    let params: Vec<ParamSpec> =
        serde_json::from_str(block).map_err(|e| SpecBlockError::InvalidJson {
            tool: name.to_string(),
            reason: e.to_string(),
        })?;

    validate_params(name, &params)?;

    Ok(ToolSpec {
        name: name.to_string(),
        description: human,
        params,
    })
}

/// Splits a description into its human text and the raw block body
fn split_block<'a>(name: &str, description: &'a str) -> Result<(String, &'a str), SpecBlockError> {
    let open = description
        .find(BLOCK_OPEN)
        .ok_or_else(|| SpecBlockError::MissingBlock(name.to_string()))?;

    let body_start = open + BLOCK_OPEN.len();
    let rest = &description[body_start..];
    let close = rest
        .find(BLOCK_CLOSE)
        .ok_or_else(|| SpecBlockError::Unterminated(name.to_string()))?;

    let block = &rest[..close];
    let after = &rest[close + BLOCK_CLOSE.len()..];

    let human = format!("{}{}", &description[..open], after)
        .trim()
        .to_string();

    Ok((human, block.trim()))
}

fn validate_params(tool: &str, params: &[ParamSpec]) -> Result<(), SpecBlockError> {
    let invalid = |param: &str, reason: &str| SpecBlockError::InvalidParam {
        tool: tool.to_string(),
        param: param.to_string(),
        reason: reason.to_string(),
    };

    let mut seen = HashSet::new();
    let mut inputs = 0;

    for p in params {
        if p.name.trim().is_empty() {
            return Err(invalid(&p.name, "name cannot be empty"));
        }
        if !seen.insert(p.name.as_str()) {
            return Err(invalid(&p.name, "declared more than once"));
        }
        if p.filled_by == FilledBy::Agent && p.name == OUT_DIR_PARAM {
            return Err(invalid(&p.name, "name is reserved for the runtime"));
        }
        if p.filled_by == FilledBy::Scheduler {
            if !SCHEDULER_PARAMS.contains(&p.name.as_str()) {
                return Err(invalid(
                    &p.name,
                    &format!(
                        "scheduler can only fill {}",
                        SCHEDULER_PARAMS.join(", ")
                    ),
                ));
            }
            if p.allow_ref || p.is_list {
                return Err(invalid(&p.name, "scheduler-filled parameter must be a single literal"));
            }
        }
        if !p.allow_ref && !p.ref_kinds.is_empty() {
            return Err(invalid(&p.name, "ref_kinds given but allow_ref is false"));
        }
        if p.allow_ref && p.ref_kinds.is_empty() {
            return Err(invalid(&p.name, "allow_ref requires at least one ref kind"));
        }
        if p.input {
            inputs += 1;
            if !p.allow_ref || p.is_list || p.filled_by != FilledBy::Agent {
                return Err(invalid(
                    &p.name,
                    "input parameter must be a single agent-filled reference",
                ));
            }
        }
    }

    if inputs > 1 {
        return Err(SpecBlockError::MultipleInputs {
            tool: tool.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tool::{ParamType, RefKindTag};

    const CONVERT: &str = r#"Converts raw image stacks.

```params
[
  {"name": "source", "type": "path", "required": true, "allow_ref": true,
   "ref_kinds": ["dataset", "step_output"], "input": true},
  {"name": "levels", "type": "int", "required": false},
  {"name": "channels", "type": "string", "required": false, "is_list": true}
]
```

Writes one file per channel."#;

    #[test]
    fn test_parse_tool_spec() {
        let spec = parse_tool_spec("convert", CONVERT).unwrap();
        assert_eq!(spec.name, "convert");
        assert_eq!(spec.params.len(), 3);
        assert_eq!(spec.params[1].param_type, ParamType::Int);
        assert!(spec.params[2].is_list);
        assert_eq!(spec.input_param().unwrap().name, "source");
        assert!(
            spec.params[0]
                .ref_kinds
                .contains(&RefKindTag::StepOutput)
        );
        assert_eq!(
            spec.description,
            "Converts raw image stacks.\n\n\n\nWrites one file per channel."
        );
    }

    #[test]
    fn test_missing_block() {
        let err = parse_tool_spec("x", "no parameters here").unwrap_err();
        assert_eq!(err, SpecBlockError::MissingBlock("x".to_string()));
    }

    #[test]
    fn test_unterminated_block() {
        let err = parse_tool_spec("x", "text\n```params\n[]").unwrap_err();
        assert_eq!(err, SpecBlockError::Unterminated("x".to_string()));
    }

    #[test]
    fn test_invalid_json() {
        let err = parse_tool_spec("x", "```params\n[{]\n```").unwrap_err();
        assert!(matches!(err, SpecBlockError::InvalidJson { .. }));
    }

    #[test]
    fn test_duplicate_param() {
        let desc = r#"```params
[{"name": "a", "type": "int", "required": true},
 {"name": "a", "type": "int", "required": false}]
```"#;
        let err = parse_tool_spec("x", desc).unwrap_err();
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn test_agent_filled_out_dir_rejected() {
        let desc = r#"```params
[{"name": "out_dir", "type": "path", "required": true}]
```"#;
        let err = parse_tool_spec("x", desc).unwrap_err();
        assert!(err.to_string().contains("reserved"));

        let scheduler_owned = r#"```params
[{"name": "out_dir", "type": "path", "required": true, "filled_by": "scheduler"}]
```"#;
        assert!(parse_tool_spec("x", scheduler_owned).is_ok());
    }

    #[test]
    fn test_scheduler_filled_names_are_closed() {
        let known = r#"```params
[{"name": "work_dir", "type": "path", "required": true, "filled_by": "scheduler"},
 {"name": "step_number", "type": "int", "required": true, "filled_by": "scheduler"}]
```"#;
        let spec = parse_tool_spec("x", known).unwrap();
        assert_eq!(spec.scheduler_params().count(), 2);
        assert_eq!(spec.agent_params().count(), 0);

        let unknown = r#"```params
[{"name": "scratch_dir", "type": "path", "required": true, "filled_by": "scheduler"}]
```"#;
        let err = parse_tool_spec("x", unknown).unwrap_err();
        assert!(err.to_string().contains("scheduler can only fill"));

        let as_ref = r#"```params
[{"name": "work_dir", "type": "path", "required": true, "filled_by": "scheduler",
  "allow_ref": true, "ref_kinds": ["filesystem"]}]
```"#;
        assert!(parse_tool_spec("x", as_ref).is_err());
    }

    #[test]
    fn test_ref_kind_consistency() {
        let kinds_without_allow = r#"```params
[{"name": "a", "type": "path", "required": true, "ref_kinds": ["dataset"]}]
```"#;
        assert!(parse_tool_spec("x", kinds_without_allow).is_err());

        let allow_without_kinds = r#"```params
[{"name": "a", "type": "path", "required": true, "allow_ref": true}]
```"#;
        assert!(parse_tool_spec("x", allow_without_kinds).is_err());
    }

    #[test]
    fn test_multiple_inputs_rejected() {
        let desc = r#"```params
[{"name": "a", "type": "path", "required": true, "allow_ref": true, "ref_kinds": ["dataset"], "input": true},
 {"name": "b", "type": "path", "required": true, "allow_ref": true, "ref_kinds": ["dataset"], "input": true}]
```"#;
        let err = parse_tool_spec("x", desc).unwrap_err();
        assert_eq!(
            err,
            SpecBlockError::MultipleInputs {
                tool: "x".to_string()
            }
        );
    }

    #[test]
    fn test_list_input_rejected() {
        let desc = r#"```params
[{"name": "sources", "type": "path", "required": true, "is_list": true,
  "allow_ref": true, "ref_kinds": ["dataset"], "input": true}]
```"#;
        let err = parse_tool_spec("x", desc).unwrap_err();
        assert!(err.to_string().contains("input parameter must be a single"));
    }

    #[test]
    fn test_empty_block_means_no_params() {
        let spec = parse_tool_spec("noop", "Does nothing.\n```params\n[]\n```").unwrap();
        assert!(spec.params.is_empty());
        assert_eq!(spec.description, "Does nothing.");
    }
}
