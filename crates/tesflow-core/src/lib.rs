//! Workflow engine logic and repository trait definitions for tesflow.
//!
//! This crate defines the run-state repository port that the infrastructure
//! layer implements, the tool abstraction, and the engine itself. It depends
//! only on `tesflow-types` -- never on `tesflow-infra` or any filesystem or
//! process crate.

pub mod event;
pub mod repository;
pub mod tool;
pub mod workflow;
