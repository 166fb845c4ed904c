//! Node dispatch and the composite node handlers.
//!
//! `task` nodes go straight to the executor. Composite nodes are recorded as
//! running, run their blocks through the scheduler, and then apply their own
//! output mappings to the composite raw result:
//!
//! | type        | raw result                                           |
//! |-------------|------------------------------------------------------|
//! | parallel    | object of child id -> raw result                     |
//! | conditional | object of child id -> raw result for the taken branch|
//! | loop        | array with one such object per iteration             |
//! | compose     | raw result of the last child                         |

use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tesflow_types::condition::Condition;
use tesflow_types::workflow::{LoopMode, LoopSpec, NodeKind, TaskNode};

use crate::repository::run_state::RunStateRepository;

use super::condition;
use super::context::VariableContext;
use super::definition::WorkflowError;
use super::engine::EngineError;
use super::executor;
use super::expression::type_name;
use super::mapper::OutputMapper;
use super::runtime::{NodeOutcome, RunScope};
use super::scheduler::{run_block, BlockOptions};
use super::template;

/// Result of a composite handler: the raw result, or why the node failed.
/// The outer error is reserved for failures of the engine itself.
type HandlerResult = Result<Result<Value, WorkflowError>, EngineError>;

/// Run one node of any type, recording its transitions.
pub fn run_node<'a, R: RunStateRepository>(
    scope: &'a RunScope<R>,
    node: &'a TaskNode,
    ctx: &'a mut VariableContext,
) -> BoxFuture<'a, Result<NodeOutcome, EngineError>> {
    async move {
        let started = Instant::now();
        let result = match &node.kind {
            NodeKind::Task { tool, parameters } => {
                return executor::execute_task(scope, node, tool, parameters, ctx).await;
            }
            NodeKind::Parallel { tasks } => {
                scope.task_started(node).await?;
                run_parallel(scope, node, tasks, ctx).await
            }
            NodeKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                scope.task_started(node).await?;
                run_conditional(scope, node, condition, then, otherwise, ctx).await
            }
            NodeKind::Loop(spec) => {
                scope.task_started(node).await?;
                run_loop(scope, node, spec, ctx).await
            }
            NodeKind::Compose { tasks } => {
                scope.task_started(node).await?;
                run_compose(scope, node, tasks, ctx).await
            }
        };

        let result = result?.and_then(|raw| {
            OutputMapper::apply(&node.output_mapping, &raw, ctx)?;
            Ok(raw)
        });
        let result = match result {
            Err(_) if scope.is_cancelled() => Err(WorkflowError::Cancelled),
            other => other,
        };

        match result {
            Ok(raw) => {
                scope.task_succeeded(node, raw.clone(), started).await?;
                Ok(NodeOutcome::Succeeded(raw))
            }
            Err(err) => {
                scope.task_failed(node, &err).await?;
                Ok(NodeOutcome::Failed {
                    tolerated: node.continue_on_error,
                })
            }
        }
    }
    .boxed()
}

async fn run_parallel<R: RunStateRepository>(
    scope: &RunScope<R>,
    node: &TaskNode,
    tasks: &[TaskNode],
    ctx: &mut VariableContext,
) -> HandlerResult {
    tracing::debug!(run_id = %scope.run_id, task_id = %node.id, children = tasks.len(), "running parallel block");
    let outcome = run_block(scope, tasks, ctx, BlockOptions::parallel()).await?;
    Ok(outcome.into_result(&node.id))
}

async fn run_conditional<R: RunStateRepository>(
    scope: &RunScope<R>,
    node: &TaskNode,
    condition: &Condition,
    then: &[TaskNode],
    otherwise: &[TaskNode],
    ctx: &mut VariableContext,
) -> HandlerResult {
    let holds = match condition::evaluate(condition, ctx) {
        Ok(holds) => holds,
        Err(err) => return Ok(Err(err)),
    };
    tracing::debug!(run_id = %scope.run_id, task_id = %node.id, holds, "condition evaluated");

    let (taken, not_taken) = if holds {
        (then, otherwise)
    } else {
        (otherwise, then)
    };
    let not_taken: Vec<&TaskNode> = not_taken.iter().collect();
    scope
        .tasks_skipped(&not_taken, &format!("condition was {holds}"))
        .await?;

    let outcome = run_block(scope, taken, ctx, BlockOptions::sequential()).await?;
    Ok(outcome.into_result(&node.id))
}

async fn run_loop<R: RunStateRepository>(
    scope: &RunScope<R>,
    node: &TaskNode,
    spec: &LoopSpec,
    ctx: &mut VariableContext,
) -> HandlerResult {
    let limit = spec
        .max_iterations
        .unwrap_or(scope.limits.max_loop_iterations);
    let limit_exceeded = || WorkflowError::LoopLimitExceeded {
        task_id: node.id.clone(),
        limit,
    };
    let mut iterations = Vec::new();

    match &spec.mode {
        LoopMode::For {
            collection,
            variable,
        } => {
            let items = match loop_collection(node, collection, ctx) {
                Ok(items) => items,
                Err(err) => return Ok(Err(err)),
            };
            if items.len() > limit {
                return Ok(Err(limit_exceeded()));
            }
            tracing::debug!(run_id = %scope.run_id, task_id = %node.id, items = items.len(), "running for loop");

            for item in items {
                let mut iteration = ctx.fork();
                iteration.bind_local(variable.clone(), item);
                match run_iteration(scope, node, spec, ctx, iteration).await? {
                    Ok(results) => iterations.push(results),
                    Err(err) => return Ok(Err(err)),
                }
            }
        }
        LoopMode::While { condition } => loop {
            match condition::evaluate(condition, ctx) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => return Ok(Err(err)),
            }
            if iterations.len() >= limit {
                return Ok(Err(limit_exceeded()));
            }
            let iteration = ctx.fork();
            match run_iteration(scope, node, spec, ctx, iteration).await? {
                Ok(results) => iterations.push(results),
                Err(err) => return Ok(Err(err)),
            }
        },
    }

    Ok(Ok(Value::Array(iterations)))
}

/// One pass over the loop body in its own scope.
async fn run_iteration<R: RunStateRepository>(
    scope: &RunScope<R>,
    node: &TaskNode,
    spec: &LoopSpec,
    ctx: &mut VariableContext,
    mut iteration: VariableContext,
) -> HandlerResult {
    if scope.is_cancelled() {
        return Ok(Err(WorkflowError::Cancelled));
    }
    let outcome = run_block(scope, &spec.body, &mut iteration, BlockOptions::sequential()).await?;
    if let Err(err) = ctx.merge(iteration) {
        return Ok(Err(err));
    }
    Ok(outcome.into_result(&node.id))
}

fn loop_collection(
    node: &TaskNode,
    collection: &Value,
    ctx: &VariableContext,
) -> Result<Vec<Value>, WorkflowError> {
    match template::resolve_value(collection, ctx)? {
        Value::Array(items) => Ok(items),
        other => Err(WorkflowError::TaskExecution {
            task_id: node.id.clone(),
            message: format!("loop collection must be an array, got {}", type_name(&other)),
        }),
    }
}

async fn run_compose<R: RunStateRepository>(
    scope: &RunScope<R>,
    node: &TaskNode,
    tasks: &[TaskNode],
    ctx: &mut VariableContext,
) -> HandlerResult {
    let outcome = run_block(scope, tasks, ctx, BlockOptions::compose()).await?;
    let last = outcome.last.clone().unwrap_or(Value::Null);
    Ok(outcome.into_result(&node.id).map(|_| last))
}
