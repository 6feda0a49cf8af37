//! Prompt templates
//!
//! Placeholders in braces are substituted with `str::replace`.

pub const SKELETON_SYSTEM_PROMPT: &str = "You plan data-processing pipelines. \
You choose which tools run and in which order. Answer with a single JSON object and nothing else.";

pub const SKELETON_PROMPT: &str = r#"Plan the pipeline for this request:

{intent}

Available tools:
{tools}

Return a JSON object of the form
{"steps": [{"step_number": 1, "tool_name": "<tool>", "purpose": "<what this step does>"}]}

Rules:
- step_number starts at 1 and increases by 1 for each step
- tool_name must be one of the available tools
- purpose must be a short, non-empty sentence
- do not choose any parameter values yet"#;

pub const PARAM_SYSTEM_PROMPT: &str = "You fill in one parameter of one pipeline step at a time. \
Answer with a single JSON object and nothing else.";

pub const PARAM_PROMPT: &str = r#"User request:
{intent}

Pipeline so far:
{steps}

You are choosing parameter '{param}' of step {step_number} (tool '{tool}', purpose: {purpose}).

Parameter:
{param_spec}
{datasets}
Answer with a JSON object:
{format}"#;

pub const SCALAR_FORMAT: &str = r#"{"value_mode": "literal", "value": <value>}
or {"value_mode": "ref", "ref": {"kind": "dataset", "id": <int>} | {"kind": "step_output", "step": <earlier step number>} | {"kind": "filesystem", "path": "<absolute path>"}}
or {"value_mode": "omit"} (only if the parameter is not required)
A ref may carry an optional "relative" sub-path without '..'."#;

pub const LIST_FORMAT: &str = r#"{"items": [<item>, ...]} where each item is
{"value_mode": "literal", "value": <value>} or {"value_mode": "ref", "ref": {...}}
Items cannot be omitted; return an empty items list to leave an optional parameter out."#;

pub const RETRY_SUFFIX: &str = "\n\nYour previous answer was rejected: {error}\nFix the problem and answer again.";
