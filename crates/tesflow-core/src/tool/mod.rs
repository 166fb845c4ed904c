//! Tool ports: the callables task nodes invoke by name.
//!
//! - `callable` -- the `Tool` trait and `ToolError`
//! - `box_tool` -- object-safe `ToolDyn` blanket wrapper and `BoxTool`
//! - `registry` -- name -> tool lookup used by the executor

pub mod box_tool;
pub mod callable;
pub mod registry;

pub use box_tool::BoxTool;
pub use registry::ToolRegistry;
pub use callable::{Tool, ToolError};
