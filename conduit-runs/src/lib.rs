//! Conduit Runs
//!
//! Owns the lifecycle of tool subprocesses ("runs"):
//! - Registry: the explicit set of tools that can be launched
//! - Invocation: turning a tool definition plus parameters into a command line
//! - Manager: launch, log pumping, polling, status and cancellation
//!
//! A run knows nothing about tasks or steps. Each run gets its own directory
//! holding an append-only JSONL log and a single JSON status record, and
//! exactly one background task writes to them.

pub mod error;
pub mod invocation;
pub mod log_file;
pub mod manager;
pub mod registry;
pub mod status_file;

pub use error::{RegistryError, RunError};
pub use manager::{LaunchRequest, RunManager};
pub use registry::{ToolDefinition, ToolRegistry};
