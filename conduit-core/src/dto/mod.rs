//! Data Transfer Objects
//!
//! This module contains the request and response shapes of the task API
//! and the run polling protocol. DTOs are lightweight views of domain
//! entities that callers outside the engine consume.

pub mod run;
pub mod task;
