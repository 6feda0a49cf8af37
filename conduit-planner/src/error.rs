//! Planner error types

use thiserror::Error;

/// Failures talking to the LLM backend
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing API base URL: CONDUIT_LLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("failed to parse LLM response envelope: {0}")]
    ParseError(String),
}

/// Failures turning a completion into a structured answer
#[derive(Debug, Error, PartialEq)]
pub enum ExtractError {
    #[error("response has no choices")]
    NoChoices,

    #[error("response content is empty")]
    EmptyContent,

    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("response must be a JSON object")]
    NotAnObject,

    #[error("response has the wrong shape: {0}")]
    Shape(String),
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("step planning failed after {attempts} attempt(s): {reason}")]
    StepPlan { attempts: u32, reason: String },

    #[error(
        "step {step} ({tool}): parameter '{param}' could not be planned after {attempts} attempt(s): {reason}"
    )]
    ParamPlan {
        step: u32,
        tool: String,
        param: String,
        attempts: u32,
        reason: String,
    },

    #[error("invalid plan: {0}")]
    Validation(String),

    #[error("LLM backend unavailable: {0}")]
    Connectivity(#[from] LlmError),
}

/// Every error found while compiling or validating a plan
#[derive(Debug, Error)]
#[error("{}", join(.0))]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn errors(&self) -> &[CompileError] {
        &self.0
    }
}

impl From<CompileError> for CompileErrors {
    fn from(error: CompileError) -> Self {
        CompileErrors(vec![error])
    }
}

fn join(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
