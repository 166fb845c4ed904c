//! Builtin tools available without configuration.

use serde_json::{json, Value};
use tesflow_core::tool::{Tool, ToolError};

/// Returns its parameters unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the parameters unchanged"
    }

    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        Ok(params)
    }
}

/// Logs `message` at `level` (default `info`) and returns `{"message": ...}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTool;

impl Tool for LogTool {
    fn name(&self) -> &str {
        "log"
    }

    fn description(&self) -> &str {
        "Write a message to the engine log"
    }

    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        let message = match params.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                return Err(ToolError::InvalidParameters(
                    "missing 'message' parameter".to_string(),
                ))
            }
        };
        match params.get("level").and_then(Value::as_str).unwrap_or("info") {
            "error" => tracing::error!(target: "tesflow::workflow", "{message}"),
            "warn" | "warning" => tracing::warn!(target: "tesflow::workflow", "{message}"),
            "debug" => tracing::debug!(target: "tesflow::workflow", "{message}"),
            _ => tracing::info!(target: "tesflow::workflow", "{message}"),
        }
        Ok(json!({ "message": message }))
    }
}
