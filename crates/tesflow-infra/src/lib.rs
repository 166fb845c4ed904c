//! Infrastructure layer for tesflow.
//!
//! Contains implementations of the ports defined in `tesflow-core`: the
//! filesystem run-state store, subprocess-backed command tools, the builtin
//! tools, and the TOML engine-config loader.

pub mod config;
pub mod store;
pub mod tool;
