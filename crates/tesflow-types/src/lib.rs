//! Shared domain types for tesflow.
//!
//! This crate contains the types used across the engine: the typed workflow
//! AST (`WorkflowDefinition`, `TaskNode`), run-tracking records
//! (`WorkflowRun`, `TaskState`), engine configuration, lifecycle events,
//! and the error types shared by storage adapters.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod condition;
pub mod config;
pub mod error;
pub mod event;
pub mod run;
pub mod workflow;
