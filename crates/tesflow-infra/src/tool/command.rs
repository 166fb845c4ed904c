//! Command tools: external executables exposed to workflows.
//!
//! The resolved parameters are written as JSON to the process's stdin; its
//! stdout must be a JSON document, which becomes the task's raw result. A
//! non-zero exit status fails the call with the trimmed stderr as message.
//! The child is killed when the call is dropped, so task timeouts and run
//! cancellation never leave orphaned processes behind.

use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tesflow_core::tool::{Tool, ToolError};
use tesflow_types::config::CommandToolConfig;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    description: String,
    config: CommandToolConfig,
}

impl CommandTool {
    pub fn new(name: impl Into<String>, config: CommandToolConfig) -> Self {
        let description = std::iter::once(config.command.as_str())
            .chain(config.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            name: name.into(),
            description,
            config,
        }
    }

    async fn run(&self, params: Value) -> Result<Value, ToolError> {
        let input = serde_json::to_vec(&params)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let mut command = tokio::process::Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            ToolError::Unavailable(format!("failed to spawn '{}': {e}", self.config.command))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A process that exits without reading its input is not an error.
            if let Err(err) = stdin.write_all(&input).await {
                tracing::debug!(tool = %self.name, error = %err, "stdin closed early");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ToolError::Failed(format!("failed to wait for '{}': {e}", self.name)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::Failed(format!(
                "'{}' exited with {}: {}",
                self.name,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout).map_err(|e| {
            ToolError::Failed(format!("'{}' did not print valid JSON: {e}", self.name))
        })
    }
}

impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        tracing::debug!(tool = %self.name, command = %self.config.command, "spawning command tool");
        match self.config.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.run(params))
                .await
                .map_err(|_| ToolError::Failed(format!("'{}' timed out after {secs}s", self.name)))?,
            None => self.run(params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell(script: &str) -> CommandTool {
        CommandTool::new(
            "sh_tool",
            CommandToolConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                env: Default::default(),
                cwd: None,
                timeout_secs: None,
            },
        )
    }

    #[tokio::test]
    async fn parameters_arrive_on_stdin_and_result_is_parsed() {
        let tool = shell("cat");
        let result = tool.call(json!({"x": [1, 2]})).await.unwrap();
        assert_eq!(result, json!({"x": [1, 2]}));
    }

    #[tokio::test]
    async fn non_zero_exit_fails_with_stderr() {
        let tool = shell("echo broken >&2; exit 3");
        let err = tool.call(json!({})).await.unwrap_err();
        match err {
            ToolError::Failed(message) => assert!(message.contains("broken"), "got: {message}"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_stdout_fails() {
        let tool = shell("echo hello");
        let err = tool.call(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("valid JSON"));
    }

    #[tokio::test]
    async fn empty_stdout_is_null() {
        let tool = shell("true");
        assert_eq!(tool.call(json!({})).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn env_is_passed_to_process() {
        let mut tool = shell("printf '{\"greeting\": \"%s\"}' \"$GREETING\"");
        tool.config.env.insert("GREETING".to_string(), "hi".to_string());
        assert_eq!(tool.call(json!({})).await.unwrap(), json!({"greeting": "hi"}));
    }

    #[tokio::test]
    async fn missing_executable_is_unavailable() {
        let tool = CommandTool::new(
            "ghost",
            CommandToolConfig {
                command: "/nonexistent/tesflow-tool".to_string(),
                args: Vec::new(),
                env: Default::default(),
                cwd: None,
                timeout_secs: None,
            },
        );
        assert!(matches!(
            tool.call(json!({})).await.unwrap_err(),
            ToolError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn process_timeout_fails_call() {
        let mut tool = shell("sleep 5");
        tool.config.timeout_secs = Some(1);
        let err = tool.call(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn description_shows_command_line() {
        assert_eq!(shell("cat").description(), "sh -c cat");
    }
}
