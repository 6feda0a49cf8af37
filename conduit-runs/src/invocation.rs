//! Tool invocation
//!
//! Builds the command line and environment for one run. Parameters are
//! appended after the tool's fixed command as `--<name> <value>` pairs, and
//! the whole parameter object is also exported as JSON for tools that prefer
//! reading their environment.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::RunError;
use crate::registry::ToolDefinition;

pub const ENV_IN_DIR: &str = "CONDUIT_IN_DIR";
pub const ENV_OUT_DIR: &str = "CONDUIT_OUT_DIR";
pub const ENV_RUN_ID: &str = "CONDUIT_RUN_ID";
pub const ENV_PARAMS: &str = "CONDUIT_PARAMS";

/// Fully built process invocation
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: PathBuf,
}

pub fn build_invocation(
    tool: &ToolDefinition,
    run_id: &str,
    in_dir: Option<&Path>,
    out_dir: &Path,
    params: &BTreeMap<String, JsonValue>,
) -> Result<InvocationSpec, RunError> {
    let (program, fixed) = tool
        .command
        .split_first()
        .ok_or_else(|| RunError::UnknownTool(tool.name.clone()))?;

    let mut args: Vec<String> = fixed.to_vec();
    if let Some(dir) = in_dir {
        args.push("--in-dir".to_string());
        args.push(dir.display().to_string());
    }
    args.push("--out-dir".to_string());
    args.push(out_dir.display().to_string());

    for (name, value) in params {
        match value {
            JsonValue::Null => {}
            JsonValue::Array(items) => {
                for item in items {
                    args.push(format!("--{}", name));
                    args.push(render(item));
                }
            }
            other => {
                args.push(format!("--{}", name));
                args.push(render(other));
            }
        }
    }

    let mut env: Vec<(String, String)> = tool
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(dir) = in_dir {
        env.push((ENV_IN_DIR.to_string(), dir.display().to_string()));
    }
    env.push((ENV_OUT_DIR.to_string(), out_dir.display().to_string()));
    env.push((ENV_RUN_ID.to_string(), run_id.to_string()));
    env.push((ENV_PARAMS.to_string(), serde_json::to_string(params)?));

    Ok(InvocationSpec {
        program: program.clone(),
        args,
        env,
        working_dir: out_dir.to_path_buf(),
    })
}

/// Renders a scalar the way it appears on the command line
fn render(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> ToolDefinition {
        ToolDefinition {
            name: "convert".to_string(),
            description: String::new(),
            command: vec!["python3".to_string(), "convert.py".to_string()],
            env: BTreeMap::from([("MODE".to_string(), "fast".to_string())]),
        }
    }

    #[test]
    fn test_build_invocation_args() {
        let params = BTreeMap::from([
            ("channels".to_string(), json!(["r", "g"])),
            ("levels".to_string(), json!(3)),
            ("dry_run".to_string(), json!(false)),
            ("skip".to_string(), JsonValue::Null),
        ]);

        let spec = build_invocation(
            &tool(),
            "run-1",
            Some(Path::new("/in")),
            Path::new("/out"),
            &params,
        )
        .unwrap();

        assert_eq!(spec.program, "python3");
        assert_eq!(
            spec.args,
            vec![
                "convert.py",
                "--in-dir",
                "/in",
                "--out-dir",
                "/out",
                "--channels",
                "r",
                "--channels",
                "g",
                "--dry_run",
                "false",
                "--levels",
                "3",
            ]
        );
        assert_eq!(spec.working_dir, PathBuf::from("/out"));
    }

    #[test]
    fn test_build_invocation_env() {
        let params = BTreeMap::from([("levels".to_string(), json!(3))]);
        let spec = build_invocation(&tool(), "run-1", None, Path::new("/out"), &params).unwrap();

        let env: BTreeMap<_, _> = spec.env.into_iter().collect();
        assert_eq!(env.get("MODE").map(String::as_str), Some("fast"));
        assert_eq!(env.get(ENV_OUT_DIR).map(String::as_str), Some("/out"));
        assert_eq!(env.get(ENV_RUN_ID).map(String::as_str), Some("run-1"));
        assert_eq!(env.get(ENV_PARAMS).map(String::as_str), Some(r#"{"levels":3}"#));
        assert!(!env.contains_key(ENV_IN_DIR));
        assert!(!spec.args.contains(&"--in-dir".to_string()));
    }
}
