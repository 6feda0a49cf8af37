//! Conduit Core
//!
//! Core types and abstractions for the Conduit pipeline engine.
//!
//! This crate contains:
//! - Environment configuration helpers
//! - Domain types: tool specs, references, argument values, tasks, steps and runs
//! - DTOs: the shapes exchanged over the task, tool and run protocols
//! - The parameter block parser used to read tool specs out of descriptions
//! - The reference resolver that turns symbolic references into paths

pub mod config;
pub mod domain;
pub mod dto;
pub mod resolver;
pub mod spec_block;
