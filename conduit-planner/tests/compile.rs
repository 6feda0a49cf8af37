use async_trait::async_trait;
use conduit_core::domain::reference::RefKind;
use conduit_core::domain::tool::ToolSpec;
use conduit_core::domain::value::ArgValue;
use conduit_core::spec_block::parse_tool_spec;
use conduit_planner::{
    CompileError, GenerationRequest, GenerationResponse, LlmError, LlmProvider, PlanCompiler,
    PlannerConfig,
};
use serde_json::json;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Replays canned completions in order and records every request
#[derive(Default)]
struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<serde_json::Value>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Err(LlmError::RequestFailed(
                "connection refused".to_string(),
            ))])),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn prompt(&self, call: usize) -> String {
        self.requests.lock().unwrap()[call].messages[1].content.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(content)) => Ok(GenerationResponse::from_content(content)),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::RequestFailed("script exhausted".to_string())),
        }
    }
}

fn catalog() -> Vec<ToolSpec> {
    let ingest = parse_tool_spec(
        "ingest",
        r#"Copies raw files into the workspace.
```params
[
  {"name": "source", "type": "path", "required": true, "allow_ref": true,
   "ref_kinds": ["dataset", "filesystem"], "input": true},
  {"name": "levels", "type": "int", "required": false}
]
```"#,
    )
    .unwrap();

    let train = parse_tool_spec(
        "train",
        r#"Trains a model on prepared data.
```params
[
  {"name": "source", "type": "path", "required": true, "allow_ref": true,
   "ref_kinds": ["step_output"], "input": true},
  {"name": "epochs", "type": "int", "required": true},
  {"name": "tags", "type": "string", "required": false, "is_list": true}
]
```"#,
    )
    .unwrap();

    vec![ingest, train]
}

fn all_tools() -> BTreeSet<String> {
    BTreeSet::from(["ingest".to_string(), "train".to_string()])
}

fn skeleton() -> serde_json::Value {
    json!({"steps": [
        {"step_number": 1, "tool_name": "ingest", "purpose": "load the raw data"},
        {"step_number": 2, "tool_name": "train", "purpose": "train on it"}
    ]})
}

fn compiler(llm: Arc<ScriptedLlm>, config: PlannerConfig) -> PlanCompiler {
    PlanCompiler::new(llm, config)
}

#[tokio::test]
async fn test_compile_two_step_plan() {
    let llm = ScriptedLlm::new(vec![
        skeleton(),
        json!({"value_mode": "ref", "ref": {"kind": "filesystem", "path": "/data/in"}}),
        json!({"value_mode": "literal", "value": "3"}),
        json!({"value_mode": "ref", "ref": {"kind": "step_output", "step": 1}}),
        json!({"value_mode": "literal", "value": 20}),
        json!({"items": [{"value_mode": "literal", "value": "nightly"}]}),
    ]);

    let plan = compiler(llm.clone(), PlannerConfig::default())
        .compile(&catalog(), &all_tools(), "ingest /data/in and train on it")
        .await
        .unwrap();

    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.steps[0].step_number, 1);
    assert_eq!(
        plan.steps[0].args["source"],
        ArgValue::Ref(RefKind::filesystem("/data/in"))
    );
    assert_eq!(plan.steps[0].args["levels"], ArgValue::int(3));
    assert_eq!(
        plan.steps[1].args["source"],
        ArgValue::Ref(RefKind::step_output(1))
    );
    assert_eq!(plan.steps[1].args["epochs"], ArgValue::int(20));
    assert_eq!(plan.steps[1].purpose.as_deref(), Some("train on it"));
    assert_eq!(llm.calls(), 6);

    assert!(llm.prompt(0).contains("- ingest: Copies raw files into the workspace."));
    assert!(llm.prompt(3).contains("parameter 'source' of step 2"));
}

#[tokio::test]
async fn test_skeleton_is_retried_with_the_error() {
    let llm = ScriptedLlm::new(vec![
        json!({"steps": [
            {"step_number": 1, "tool_name": "ingest", "purpose": "load"},
            {"step_number": 3, "tool_name": "train", "purpose": "train"}
        ]}),
        json!({"steps": [{"step_number": 1, "tool_name": "ingest", "purpose": "load"}]}),
        json!({"value_mode": "ref", "ref": {"kind": "dataset", "id": 4}}),
        json!({"value_mode": "omit"}),
    ]);

    let plan = compiler(llm.clone(), PlannerConfig::default())
        .compile(&catalog(), &all_tools(), "load dataset 4")
        .await
        .unwrap();

    assert_eq!(plan.steps.len(), 1);
    assert!(!plan.steps[0].args.contains_key("levels"));
    assert!(llm.prompt(1).contains("previous answer was rejected"));
    assert!(llm.prompt(1).contains("missing 2"));
}

#[tokio::test]
async fn test_skeleton_exhaustion_is_step_plan_error() {
    let bad = json!({"steps": [{"step_number": 1, "tool_name": "deploy", "purpose": "ship"}]});
    let llm = ScriptedLlm::new(vec![bad.clone(), bad.clone(), bad]);

    let errors = compiler(llm.clone(), PlannerConfig::default())
        .compile(&catalog(), &all_tools(), "ship it")
        .await
        .unwrap_err();

    assert!(matches!(
        errors.errors(),
        [CompileError::StepPlan { attempts: 3, .. }]
    ));
    assert_eq!(llm.calls(), 3);
}

#[tokio::test]
async fn test_ref_for_literal_only_required_param_is_rejected() {
    let as_ref = json!({"value_mode": "ref", "ref": {"kind": "step_output", "step": 1}});
    let config = PlannerConfig {
        max_retries: 2,
        ..PlannerConfig::default()
    };
    let llm = ScriptedLlm::new(vec![
        skeleton(),
        json!({"value_mode": "ref", "ref": {"kind": "filesystem", "path": "/data/in"}}),
        json!({"value_mode": "omit"}),
        json!({"value_mode": "ref", "ref": {"kind": "step_output", "step": 1}}),
        // epochs: required, literal only
        as_ref.clone(),
        as_ref,
    ]);

    let errors = compiler(llm.clone(), config)
        .compile(&catalog(), &all_tools(), "ingest and train")
        .await
        .unwrap_err();

    match errors.errors() {
        [CompileError::ParamPlan {
            step,
            param,
            attempts,
            reason,
            ..
        }] => {
            assert_eq!(*step, 2);
            assert_eq!(param, "epochs");
            assert_eq!(*attempts, 2);
            assert!(reason.contains("does not accept references"));
        }
        other => panic!("unexpected errors: {:?}", other),
    }
}

#[tokio::test]
async fn test_omit_on_required_param_is_param_plan_error() {
    let config = PlannerConfig {
        max_retries: 1,
        ..PlannerConfig::default()
    };
    let llm = ScriptedLlm::new(vec![
        json!({"steps": [{"step_number": 1, "tool_name": "ingest", "purpose": "load"}]}),
        json!({"value_mode": "omit"}),
    ]);

    let errors = compiler(llm, config)
        .compile(&catalog(), &all_tools(), "load")
        .await
        .unwrap_err();

    assert!(matches!(
        errors.errors(),
        [CompileError::ParamPlan { param, .. }] if param == "source"
    ));
}

#[tokio::test]
async fn test_failed_optional_param_degrades_to_omit() {
    let config = PlannerConfig {
        max_retries: 2,
        ..PlannerConfig::default()
    };
    let llm = ScriptedLlm::new(vec![
        json!({"steps": [{"step_number": 1, "tool_name": "ingest", "purpose": "load"}]}),
        json!({"value_mode": "ref", "ref": {"kind": "dataset", "id": 1}}),
        json!({"value_mode": "literal", "value": "lots"}),
        json!({"value_mode": "literal", "value": [1, 2]}),
    ]);

    let plan = compiler(llm.clone(), config)
        .compile(&catalog(), &all_tools(), "load dataset 1")
        .await
        .unwrap();

    assert_eq!(llm.calls(), 4);
    assert!(!plan.steps[0].args.contains_key("levels"));
    assert_eq!(plan.steps[0].args["source"], ArgValue::Ref(RefKind::dataset(1)));
}

#[tokio::test]
async fn test_dataset_allow_list_is_enforced() {
    let config = PlannerConfig {
        max_retries: 1,
        ..PlannerConfig::default()
    }
    .with_dataset_allow_list([1, 2]);
    let llm = ScriptedLlm::new(vec![
        json!({"steps": [{"step_number": 1, "tool_name": "ingest", "purpose": "load"}]}),
        json!({"value_mode": "ref", "ref": {"kind": "dataset", "id": 9}}),
    ]);

    let errors = compiler(llm.clone(), config)
        .compile(&catalog(), &all_tools(), "load dataset 9")
        .await
        .unwrap_err();

    assert!(errors.to_string().contains("not in the allowed dataset list"));
    assert!(llm.prompt(1).contains("Dataset ids you may reference: 1, 2"));
}

#[tokio::test]
async fn test_connectivity_failure_aborts_immediately() {
    let llm = ScriptedLlm::failing();

    let errors = compiler(llm.clone(), PlannerConfig::default())
        .compile(&catalog(), &all_tools(), "anything")
        .await
        .unwrap_err();

    assert!(matches!(errors.errors(), [CompileError::Connectivity(_)]));
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn test_nothing_to_plan_with() {
    let llm = ScriptedLlm::new(vec![]);
    let compiler = compiler(llm.clone(), PlannerConfig::default());

    let errors = compiler
        .compile(&catalog(), &all_tools(), "   ")
        .await
        .unwrap_err();
    assert!(matches!(errors.errors(), [CompileError::Validation(_)]));

    let errors = compiler
        .compile(&catalog(), &BTreeSet::from(["deploy".to_string()]), "ship")
        .await
        .unwrap_err();
    assert!(matches!(errors.errors(), [CompileError::Validation(_)]));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_disallowed_tool_is_not_offered() {
    let llm = ScriptedLlm::new(vec![
        json!({"steps": [{"step_number": 1, "tool_name": "train", "purpose": "train"}]}),
        json!({"steps": [{"step_number": 1, "tool_name": "ingest", "purpose": "load"}]}),
        json!({"value_mode": "ref", "ref": {"kind": "filesystem", "path": "/in"}}),
        json!({"value_mode": "omit"}),
    ]);

    let plan = compiler(llm.clone(), PlannerConfig::default())
        .compile(&catalog(), &BTreeSet::from(["ingest".to_string()]), "load")
        .await
        .unwrap();

    assert_eq!(plan.steps[0].tool_name, "ingest");
    assert!(!llm.prompt(0).contains("- train"));
}
