//! Ready-set scheduler for one block of sibling nodes.
//!
//! A node is dispatched once every node it depends on has succeeded. When a
//! dependency fails or is skipped, its dependents are skipped transitively.
//! Each dispatched node runs in a forked context that is merged back when it
//! completes, so private bindings never leak between siblings.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tesflow_types::run::TaskStatus;
use tesflow_types::workflow::TaskNode;

use crate::repository::run_state::RunStateRepository;

use super::context::VariableContext;
use super::dag::build_block_graph;
use super::definition::WorkflowError;
use super::engine::EngineError;
use super::executor::PIPED_INPUT;
use super::handlers::run_node;
use super::runtime::{NodeOutcome, RunScope};

/// How a block is scheduled.
#[derive(Debug, Clone, Default)]
pub struct BlockOptions {
    /// Maximum nodes in flight at once; `None` dispatches every ready node.
    pub max_in_flight: Option<usize>,
    /// Stop dispatching after the first intolerant failure.
    pub stop_on_failure: bool,
    /// Bind the previous node's raw result as `_piped_input`.
    pub pipe_results: bool,
    /// Nodes already succeeded in an earlier attempt of the run, with their
    /// stored results. They are not re-run.
    pub completed: HashMap<String, Value>,
}

impl BlockOptions {
    /// Dispatch every ready node at once, stopping on failure.
    pub fn concurrent() -> Self {
        Self {
            stop_on_failure: true,
            ..Self::default()
        }
    }

    /// One node at a time, in declaration order where dependencies allow.
    pub fn sequential() -> Self {
        Self {
            max_in_flight: Some(1),
            stop_on_failure: true,
            ..Self::default()
        }
    }

    /// Every child runs, whatever happens to its siblings.
    pub fn parallel() -> Self {
        Self::default()
    }

    /// Sequential, piping each raw result into the next node.
    pub fn compose() -> Self {
        Self {
            pipe_results: true,
            ..Self::sequential()
        }
    }

    pub fn with_completed(mut self, completed: HashMap<String, Value>) -> Self {
        self.completed = completed;
        self
    }
}

/// What a block produced.
#[derive(Debug, Default)]
pub struct BlockOutcome {
    /// Raw results of the nodes that succeeded, by id.
    pub results: Map<String, Value>,
    /// Raw result of the most recently completed successful node.
    pub last: Option<Value>,
    /// First node whose failure was not tolerated.
    pub failed: Option<String>,
    pub tolerated_failures: usize,
}

impl BlockOutcome {
    fn record_success(&mut self, id: &str, raw: Value) {
        self.results.insert(id.to_string(), raw.clone());
        self.last = Some(raw);
    }

    /// The block's results as the raw result of the composite `owner`, or
    /// the error naming the child that failed.
    pub fn into_result(self, owner: &str) -> Result<Value, WorkflowError> {
        match self.failed {
            Some(child) => Err(WorkflowError::TaskExecution {
                task_id: owner.to_string(),
                message: format!("child task '{child}' failed"),
            }),
            None => Ok(Value::Object(self.results)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    Running,
    Done(TaskStatus),
}

/// Run `nodes` to completion under `options`.
pub fn run_block<'a, R: RunStateRepository>(
    scope: &'a RunScope<R>,
    nodes: &'a [TaskNode],
    ctx: &'a mut VariableContext,
    options: BlockOptions,
) -> BoxFuture<'a, Result<BlockOutcome, EngineError>> {
    async move {
        let graph = build_block_graph(nodes)?;
        let mut slots = vec![Slot::Pending; nodes.len()];
        let mut outcome = BlockOutcome::default();

        for (i, node) in nodes.iter().enumerate() {
            if let Some(result) = options.completed.get(&node.id) {
                tracing::debug!(run_id = %scope.run_id, task_id = %node.id, "keeping result from earlier attempt");
                slots[i] = Slot::Done(TaskStatus::Succeeded);
                outcome.record_success(&node.id, result.clone());
            }
        }

        let mut in_flight = FuturesUnordered::new();
        let mut stop: Option<String> = None;

        loop {
            // Skip dependents of failed or skipped nodes until nothing changes.
            loop {
                let mut changed = false;
                for i in 0..nodes.len() {
                    if slots[i] != Slot::Pending {
                        continue;
                    }
                    let blocked = graph.dependencies[i].iter().find_map(|&d| match slots[d] {
                        Slot::Done(status @ (TaskStatus::Failed | TaskStatus::Skipped)) => {
                            Some((d, status))
                        }
                        _ => None,
                    });
                    if let Some((d, status)) = blocked {
                        let reason = format!("dependency '{}' {}", nodes[d].id, status.as_str());
                        scope.task_skipped(&nodes[i], &reason).await?;
                        slots[i] = Slot::Done(TaskStatus::Skipped);
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }

            if stop.is_none() && scope.is_cancelled() {
                stop = Some("run cancelled".to_string());
            }

            if stop.is_none() {
                for i in 0..nodes.len() {
                    if options
                        .max_in_flight
                        .is_some_and(|max| in_flight.len() >= max)
                    {
                        break;
                    }
                    let ready = slots[i] == Slot::Pending
                        && graph.dependencies[i]
                            .iter()
                            .all(|&d| slots[d] == Slot::Done(TaskStatus::Succeeded));
                    if !ready {
                        continue;
                    }

                    slots[i] = Slot::Running;
                    let node = &nodes[i];
                    let mut child = ctx.fork();
                    if options.pipe_results {
                        if let Some(previous) = &outcome.last {
                            child.bind_local(PIPED_INPUT, previous.clone());
                        }
                    }
                    in_flight.push(async move {
                        let result = run_node(scope, node, &mut child).await;
                        (i, result, child)
                    });
                }
            }

            let Some((i, result, child)) = in_flight.next().await else {
                break;
            };
            ctx.merge(child)?;

            let node = &nodes[i];
            match result? {
                NodeOutcome::Succeeded(raw) => {
                    slots[i] = Slot::Done(TaskStatus::Succeeded);
                    outcome.record_success(&node.id, raw);
                }
                NodeOutcome::Failed { tolerated: true } => {
                    slots[i] = Slot::Done(TaskStatus::Failed);
                    outcome.tolerated_failures += 1;
                }
                NodeOutcome::Failed { tolerated: false } => {
                    slots[i] = Slot::Done(TaskStatus::Failed);
                    outcome.failed.get_or_insert_with(|| node.id.clone());
                    if options.stop_on_failure && stop.is_none() {
                        stop = Some(format!("not started after '{}' failed", node.id));
                    }
                }
                NodeOutcome::Skipped => slots[i] = Slot::Done(TaskStatus::Skipped),
            }
        }

        let leftover: Vec<&TaskNode> = nodes
            .iter()
            .zip(&slots)
            .filter(|(_, slot)| **slot == Slot::Pending)
            .map(|(node, _)| node)
            .collect();
        if !leftover.is_empty() {
            let reason = stop.unwrap_or_else(|| "dependencies not satisfied".to_string());
            scope.tasks_skipped(&leftover, &reason).await?;
        }

        Ok(outcome)
    }
    .boxed()
}
