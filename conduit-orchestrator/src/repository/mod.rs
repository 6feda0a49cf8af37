//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each repository handles database operations for a specific domain entity.

pub mod dataset;
pub mod step;
pub mod task;

// Re-export for convenience
pub use dataset as dataset_repository;
pub use step as step_repository;
pub use task as task_repository;
