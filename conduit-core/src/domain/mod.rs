//! Core domain types
//!
//! This module contains the core domain structures used across Conduit crates.
//! These types are shared between the planner (which produces steps), the
//! orchestrator (which persists and schedules them) and the run manager
//! (which executes them).

pub mod reference;
pub mod run;
pub mod task;
pub mod tool;
pub mod value;
