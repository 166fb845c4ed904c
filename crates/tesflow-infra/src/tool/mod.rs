//! Tool implementations backed by the host.
//!
//! - `builtin` -- `echo` and `log`
//! - `command` -- external executables configured in `tesflow.toml`

pub mod builtin;
pub mod command;

use tesflow_core::tool::ToolRegistry;
use tesflow_types::config::EngineConfig;

pub use builtin::{EchoTool, LogTool};
pub use command::CommandTool;

/// Registry with the builtins plus every command tool in `config`.
///
/// A configured command tool replaces a builtin of the same name.
pub fn build_registry(config: &EngineConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool).register(LogTool);
    for (name, tool) in &config.tools {
        registry.register(CommandTool::new(name.clone(), tool.clone()));
    }
    tracing::debug!(tools = registry.len(), "tool registry built");
    registry
}
