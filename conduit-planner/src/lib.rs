//! Conduit Planner
//!
//! Turns a natural-language request into a validated, executable step list.
//!
//! Architecture:
//! - LLM: provider trait and an OpenAI-compatible client
//! - Extraction: one contract for reading structured answers out of completions
//! - Skeleton: plans which tools run and in which order
//! - Params: plans each agent-filled parameter in isolation
//! - Policy: argument allow-listing and the plan output contract
//!
//! No task is ever created here; a plan either compiles completely or the
//! caller gets every error found.

pub mod cast;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod params;
pub mod policy;
pub mod prompts;
pub mod skeleton;

pub use compiler::{CompiledPlan, PlanCompiler};
pub use config::{ParamPolicy, PlannerConfig};
pub use error::{CompileError, CompileErrors, ExtractError, LlmError};
pub use extract::StructuredAnswerExtractor;
pub use llm::{ChatClient, GenerationRequest, GenerationResponse, LlmProvider, Message};
