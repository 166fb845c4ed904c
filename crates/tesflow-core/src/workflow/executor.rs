//! Task executor: runs one `task` node against the tool registry.
//!
//! Each attempt resolves the node's parameters against the current context,
//! waits for a concurrency permit, spawns the tool call as its own tokio
//! task under the node's timeout, and applies the output mappings. Template
//! and mapping errors count as attempt failures, so they are retried and
//! tolerated exactly like tool failures.

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tesflow_types::workflow::TaskNode;

use crate::repository::run_state::RunStateRepository;

use super::context::VariableContext;
use super::definition::WorkflowError;
use super::engine::EngineError;
use super::mapper::OutputMapper;
use super::retry::RetryHandler;
use super::runtime::{NodeOutcome, RunScope};
use super::template;

/// Private binding holding the previous compose step's raw result.
pub const PIPED_INPUT: &str = "_piped_input";

/// Execute a `task` node, retrying per its policy.
pub async fn execute_task<R: RunStateRepository>(
    scope: &RunScope<R>,
    node: &TaskNode,
    tool: &str,
    parameters: &Map<String, Value>,
    ctx: &mut VariableContext,
) -> Result<NodeOutcome, EngineError> {
    scope.task_started(node).await?;
    let started = Instant::now();
    let policy = node.retry.as_ref();
    let max_attempts = RetryHandler::max_attempts(policy);

    let mut attempt = 0u32;
    let error = loop {
        attempt += 1;
        scope.record_attempt(&node.id, attempt);

        let err = match attempt_once(scope, node, tool, parameters, ctx).await {
            Ok(raw) => {
                scope.task_succeeded(node, raw.clone(), started).await?;
                return Ok(NodeOutcome::Succeeded(raw));
            }
            Err(err) => err,
        };

        if matches!(err, WorkflowError::Cancelled) {
            break err;
        }
        match policy.filter(|p| RetryHandler::should_retry(Some(*p), attempt)) {
            Some(p) => {
                let delay = RetryHandler::delay_for(p, attempt);
                scope.task_retrying(&node.id, attempt, delay, &err).await?;
                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    _ = scope.cancelled() => true,
                };
                if cancelled {
                    break WorkflowError::Cancelled;
                }
            }
            None if max_attempts > 1 => {
                break WorkflowError::RetryExhausted {
                    task_id: node.id.clone(),
                    attempts: attempt,
                    last_error: err.to_string(),
                };
            }
            None => break err,
        }
    };

    scope.task_failed(node, &error).await?;
    Ok(NodeOutcome::Failed {
        tolerated: node.continue_on_error,
    })
}

/// One invocation: resolve, call, map.
async fn attempt_once<R: RunStateRepository>(
    scope: &RunScope<R>,
    node: &TaskNode,
    tool_name: &str,
    parameters: &Map<String, Value>,
    ctx: &mut VariableContext,
) -> Result<Value, WorkflowError> {
    let mut params = template::resolve_map(parameters, ctx)?;
    if let Some(piped) = ctx.local(PIPED_INPUT) {
        params
            .entry(PIPED_INPUT.to_string())
            .or_insert_with(|| piped.clone());
    }

    let tool = scope
        .tools
        .get(tool_name)
        .ok_or_else(|| WorkflowError::UnknownTool(tool_name.to_string()))?;
    let timeout = node
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(scope.limits.default_timeout);

    let permit = tokio::select! {
        permit = scope.permits.clone().acquire_owned() => {
            permit.map_err(|_| WorkflowError::Cancelled)?
        }
        _ = scope.cancelled() => return Err(WorkflowError::Cancelled),
    };

    tracing::trace!(task_id = %node.id, tool = tool_name, "invoking tool");
    let mut handle = tokio::spawn(async move { tool.call(Value::Object(params)).await });
    let outcome = tokio::select! {
        joined = tokio::time::timeout(timeout, &mut handle) => Some(joined),
        _ = scope.cancelled() => None,
    };
    drop(permit);

    let raw = match outcome {
        None => {
            handle.abort();
            return Err(WorkflowError::Cancelled);
        }
        Some(Err(_elapsed)) => {
            handle.abort();
            return Err(WorkflowError::Timeout {
                task_id: node.id.clone(),
                timeout_secs: timeout.as_secs(),
            });
        }
        Some(Ok(Err(join_err))) => {
            return Err(WorkflowError::TaskExecution {
                task_id: node.id.clone(),
                message: format!("tool '{tool_name}' panicked: {join_err}"),
            });
        }
        Some(Ok(Ok(Err(tool_err)))) => {
            return Err(WorkflowError::TaskExecution {
                task_id: node.id.clone(),
                message: tool_err.to_string(),
            });
        }
        Some(Ok(Ok(Ok(raw)))) => raw,
    };

    OutputMapper::apply(&node.output_mapping, &raw, ctx)?;
    Ok(raw)
}
