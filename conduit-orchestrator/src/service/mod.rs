//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and contain domain logic.

pub mod catalog;
pub mod scheduler;
pub mod task;

// Re-export for convenience
pub use catalog as catalog_service;
pub use task as task_service;
