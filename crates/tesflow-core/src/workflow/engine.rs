//! Workflow engine: owns the tool registry, the checkpoint store, and the
//! event bus, and drives runs from start (or resume) to a terminal status.
//!
//! Cancellation is signalled per run via `CancellationToken`s held in a
//! `DashMap`, so `cancel` can be called from any task while the run is in
//! flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tesflow_types::config::EngineConfig;
use tesflow_types::error::RepositoryError;
use tesflow_types::event::WorkflowEvent;
use tesflow_types::run::{RunStatus, TaskState, TaskStatus, WorkflowRun};
use tesflow_types::workflow::{ExecutionMode, WorkflowDefinition};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::run_state::RunStateRepository;
use crate::tool::ToolRegistry;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::VariableContext;
use super::definition::{validate_definition, WorkflowError};
use super::runtime::{RunLimits, RunScope};
use super::scheduler::{run_block, BlockOptions};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Failures of the engine itself, as opposed to task failures, which are
/// recorded on the run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("run store error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),

    /// `resume` was called for a run that is still executing.
    #[error("workflow run {0} is already executing")]
    AlreadyRunning(Uuid),
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Executes workflow definitions against registered tools.
///
/// Generic over `R: RunStateRepository` so runs can be checkpointed to the
/// filesystem or kept in memory.
pub struct WorkflowEngine<R: RunStateRepository> {
    checkpoint: Arc<CheckpointManager<R>>,
    tools: ToolRegistry,
    event_bus: EventBus,
    config: EngineConfig,
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<R: RunStateRepository> WorkflowEngine<R> {
    pub fn new(repo: R, tools: ToolRegistry, config: EngineConfig) -> Self {
        Self {
            checkpoint: Arc::new(CheckpointManager::new(repo)),
            tools,
            event_bus: EventBus::default(),
            config,
            cancellation_tokens: DashMap::new(),
        }
    }

    /// Publish events on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repo(&self) -> &R {
        self.checkpoint.repo()
    }

    /// Create a pending run for `def`.
    ///
    /// The root context starts from the definition's `variables`, overlaid
    /// with `inputs`. The run can be cancelled from this point on.
    pub fn create_run(&self, def: &WorkflowDefinition, inputs: Map<String, Value>) -> WorkflowRun {
        let mut context = def.variables.clone();
        context.extend(inputs);

        let mut run = WorkflowRun::new(&def.name, context);
        for node in def.all_nodes() {
            run.tasks.insert(node.id.clone(), TaskState::default());
        }
        self.cancellation_tokens
            .insert(run.id, CancellationToken::new());
        run
    }

    /// Validate `def`, create a run, and execute it to completion.
    pub async fn execute(
        &self,
        def: &WorkflowDefinition,
        inputs: Map<String, Value>,
    ) -> Result<WorkflowRun, EngineError> {
        validate_definition(def)?;
        let run = self.create_run(def, inputs);
        self.execute_run(def, run).await
    }

    /// Execute a run created with [`create_run`](Self::create_run).
    ///
    /// Task failures do not produce an `Err`; they are recorded on the
    /// returned run. `Err` means the definition was invalid or the run
    /// state could not be persisted.
    pub async fn execute_run(
        &self,
        def: &WorkflowDefinition,
        run: WorkflowRun,
    ) -> Result<WorkflowRun, EngineError> {
        if let Err(e) = validate_definition(def) {
            self.cancellation_tokens.remove(&run.id);
            return Err(e.into());
        }
        self.checkpoint.checkpoint_definition(run.id, def).await?;
        self.drive(def, run, HashMap::new(), false).await
    }

    /// Continue an interrupted or failed run from its last checkpoint.
    ///
    /// Top-level nodes that succeeded keep their results and are not re-run;
    /// every other node (and everything nested in it) is reset to pending.
    pub async fn resume(&self, run_id: Uuid) -> Result<WorkflowRun, EngineError> {
        if self.cancellation_tokens.contains_key(&run_id) {
            return Err(EngineError::AlreadyRunning(run_id));
        }
        let (mut run, def) = match self.checkpoint.restore(run_id).await {
            Ok(restored) => restored,
            Err(CheckpointError::RunNotFound(id)) => return Err(EngineError::RunNotFound(id)),
            Err(e) => return Err(e.into()),
        };

        let mut completed = HashMap::new();
        for node in &def.tasks {
            match run.tasks.get(&node.id) {
                Some(state) if state.status == TaskStatus::Succeeded => {
                    completed.insert(node.id.clone(), state.result.clone().unwrap_or(Value::Null));
                }
                _ => {
                    for n in node.descendants() {
                        run.tasks.insert(n.id.clone(), TaskState::default());
                    }
                }
            }
        }

        tracing::info!(
            run_id = %run_id,
            workflow = %def.name,
            kept = completed.len(),
            "resuming workflow run"
        );
        self.cancellation_tokens
            .insert(run_id, CancellationToken::new());
        self.drive(&def, run, completed, true).await
    }

    /// Request cancellation of an executing run.
    ///
    /// Returns `false` when the run is not executing.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.cancellation_tokens.get(&run_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(run_id = %run_id, "workflow run cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Ids of the runs currently executing.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.cancellation_tokens.iter().map(|e| *e.key()).collect()
    }

    pub async fn load_run(&self, run_id: Uuid) -> Result<WorkflowRun, EngineError> {
        self.repo()
            .load_run(&run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))
    }

    /// All stored runs, most recent first.
    pub async fn list_runs(&self) -> Result<Vec<WorkflowRun>, EngineError> {
        Ok(self.repo().list_runs().await?)
    }

    // -----------------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        def: &WorkflowDefinition,
        mut run: WorkflowRun,
        completed: HashMap<String, Value>,
        resumed: bool,
    ) -> Result<WorkflowRun, EngineError> {
        let run_id = run.id;
        let started = Instant::now();
        let cancel = self
            .cancellation_tokens
            .entry(run_id)
            .or_default()
            .clone();

        run.status = RunStatus::Running;
        run.error = None;
        run.finished_at = None;

        let limits = RunLimits {
            default_timeout: Duration::from_secs(
                def.timeout_secs.unwrap_or(self.config.default_timeout_secs),
            ),
            max_loop_iterations: def
                .max_loop_iterations
                .unwrap_or(self.config.max_loop_iterations),
        };
        let root = VariableContext::new(run.context.clone());
        let scope = RunScope::new(
            run,
            root,
            Arc::clone(&self.checkpoint),
            self.event_bus.clone(),
            self.tools.clone(),
            def.max_concurrency.unwrap_or(self.config.max_concurrency),
            cancel,
            limits,
        );

        tracing::info!(
            run_id = %run_id,
            workflow = %def.name,
            resumed,
            "workflow run started"
        );
        self.event_bus.publish(WorkflowEvent::RunStarted {
            run_id,
            workflow_name: def.name.clone(),
            resumed,
        });

        let options = match def.execution {
            ExecutionMode::Dag => BlockOptions::concurrent(),
            ExecutionMode::Sequential => BlockOptions::sequential(),
        }
        .with_completed(completed);

        let outcome = async {
            scope.persist().await?;
            let mut ctx = scope.root_context().fork();
            run_block(&scope, &def.tasks, &mut ctx, options).await
        }
        .await;
        self.cancellation_tokens.remove(&run_id);

        let (status, error) = match outcome {
            Ok(outcome) => {
                if scope.is_cancelled() {
                    (RunStatus::Failed, Some("run cancelled".to_string()))
                } else if outcome.failed.is_some() {
                    (RunStatus::Failed, scope.first_error())
                } else if scope.with_run(|r| r.tasks.values().any(|t| t.status == TaskStatus::Failed)) {
                    (RunStatus::PartiallyFailed, None)
                } else {
                    (RunStatus::Succeeded, None)
                }
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "workflow run aborted");
                scope.with_run(|r| {
                    r.status = RunStatus::Failed;
                    r.error = Some(e.to_string());
                    r.finished_at = Some(Utc::now());
                });
                // Best effort: the store may be what failed.
                let _ = scope.persist().await;
                self.publish_finished(run_id, RunStatus::Failed, started);
                return Err(e);
            }
        };

        scope.with_run(|r| {
            r.status = status;
            r.error = error;
            r.finished_at = Some(Utc::now());
        });
        scope.persist().await?;

        let run = scope.snapshot();
        tracing::info!(
            run_id = %run_id,
            workflow = %def.name,
            status = %status,
            duration_ms = started.elapsed().as_millis() as u64,
            "workflow run finished"
        );
        self.publish_finished(run_id, status, started);
        Ok(run)
    }

    fn publish_finished(&self, run_id: Uuid, status: RunStatus, started: Instant) {
        self.event_bus.publish(WorkflowEvent::RunFinished {
            run_id,
            status,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRunStore;
    use crate::tool::ToolError;
    use crate::workflow::definition::parse_workflow_yaml;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn base_tools() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register_fn("echo", |params| async move { Ok::<_, ToolError>(params) });
        tools.register_fn("fail", |_| async move {
            Err::<Value, _>(ToolError::Failed("boom".to_string()))
        });
        tools
    }

    fn engine(tools: ToolRegistry) -> WorkflowEngine<InMemoryRunStore> {
        WorkflowEngine::new(InMemoryRunStore::new(), tools, EngineConfig::default())
    }

    async fn run_yaml(tools: ToolRegistry, yaml: &str) -> WorkflowRun {
        let def = parse_workflow_yaml(yaml).unwrap();
        engine(tools).execute(&def, Map::new()).await.unwrap()
    }

    fn recorder(tools: &mut ToolRegistry) -> Arc<Mutex<Vec<String>>> {
        let order = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&order);
        tools.register_fn("record", move |params: Value| {
            let log = Arc::clone(&log);
            async move {
                let name = params["name"].as_str().unwrap_or_default().to_string();
                log.lock().unwrap().push(name);
                Ok::<_, ToolError>(params)
            }
        });
        order
    }

    #[tokio::test]
    async fn linear_workflow_maps_outputs_into_context() {
        let run = run_yaml(
            base_tools(),
            r#"
name: linear
variables: { base: 2 }
tasks:
  - id: first
    tool: echo
    parameters: { value: "${base}" }
    output_mapping:
      - { source: "$.value", target: copied }
  - id: second
    tool: echo
    depends_on: [first]
    parameters: { msg: "got ${copied}" }
    output_mapping:
      - { source: "$.msg", target: message }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.context["copied"], json!(2));
        assert_eq!(run.context["message"], json!("got 2"));
        assert_eq!(run.task("first").unwrap().result, Some(json!({"value": 2})));
        assert_eq!(run.task("second").unwrap().attempts, 1);
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn diamond_respects_dependencies() {
        let mut tools = base_tools();
        let order = recorder(&mut tools);
        let run = run_yaml(
            tools,
            r#"
name: diamond
tasks:
  - { id: a, tool: record, parameters: { name: a } }
  - { id: b, tool: record, depends_on: [a], parameters: { name: b } }
  - { id: c, tool: record, depends_on: [a], parameters: { name: c } }
  - { id: d, tool: record, depends_on: [b, c], parameters: { name: d } }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Succeeded);
        let order = order.lock().unwrap().clone();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], "a");
        assert_eq!(order[3], "d");
    }

    #[tokio::test]
    async fn sequential_mode_runs_in_declaration_order() {
        let mut tools = base_tools();
        let order = recorder(&mut tools);
        let run = run_yaml(
            tools,
            r#"
name: ordered
execution: sequential
tasks:
  - { id: a, tool: record, parameters: { name: a } }
  - { id: b, tool: record, parameters: { name: b } }
  - { id: c, tool: record, parameters: { name: c } }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn parallel_child_failure_fails_run_and_keeps_sibling_result() {
        let run = run_yaml(
            base_tools(),
            r#"
name: fanout
tasks:
  - id: fanout
    type: parallel
    tasks:
      - id: good
        tool: echo
        parameters: { v: 1 }
        output_mapping:
          - { source: "$.v", target: good_value }
      - { id: bad, tool: fail }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.task_status("good"), TaskStatus::Succeeded);
        assert_eq!(run.task("good").unwrap().result, Some(json!({"v": 1})));
        assert_eq!(run.context["good_value"], json!(1));
        assert_eq!(run.task_status("bad"), TaskStatus::Failed);
        assert_eq!(run.task_status("fanout"), TaskStatus::Failed);
        let error = run.error.unwrap();
        assert!(error.contains("bad"), "got: {error}");
    }

    #[tokio::test]
    async fn tolerated_failure_gives_partial_failure_and_skips_dependents() {
        let run = run_yaml(
            base_tools(),
            r#"
name: partial
tasks:
  - { id: flaky, tool: fail, continue_on_error: true }
  - { id: after, tool: echo, depends_on: [flaky] }
  - { id: independent, tool: echo }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::PartiallyFailed);
        assert!(run.error.is_none());
        let flaky = run.task("flaky").unwrap();
        assert!(flaky.tolerated);
        assert_eq!(flaky.error.as_ref().unwrap().kind, "task_execution_error");
        let after = run.task("after").unwrap();
        assert_eq!(after.status, TaskStatus::Skipped);
        assert!(after.skip_reason.as_deref().unwrap().contains("flaky"));
        assert_eq!(run.task_status("independent"), TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn failure_stops_dispatch_of_later_nodes() {
        let run = run_yaml(
            base_tools(),
            r#"
name: stop
execution: sequential
tasks:
  - { id: broken, tool: fail }
  - { id: never, tool: echo }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.task_status("never"), TaskStatus::Skipped);
        assert_eq!(run.task("never").unwrap().attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_exponential_backoff_then_exhausts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut tools = ToolRegistry::new();
        tools.register_fn("unstable", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<Value, _>(ToolError::Failed("unavailable".to_string())) }
        });
        let def = parse_workflow_yaml(
            r#"
name: retrying
tasks:
  - id: call
    tool: unstable
    retry: { max_attempts: 3, delay: 2, backoff: exponential }
"#,
        )
        .unwrap();
        let engine = engine(tools);
        let mut events = engine.events().subscribe();

        let run = engine.execute(&def, Map::new()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let state = run.task("call").unwrap();
        assert_eq!(state.attempts, 3);
        assert_eq!(state.error.as_ref().unwrap().kind, "retry_exhausted");
        assert_eq!(run.status, RunStatus::Failed);

        let mut delays = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let WorkflowEvent::TaskRetrying { delay_ms, .. } = event {
                delays.push(delay_ms);
            }
        }
        assert_eq!(delays, vec![2000, 4000]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut tools = ToolRegistry::new();
        tools.register_fn("slow", |_| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, ToolError>(json!("late"))
        });
        let run = run_yaml(
            tools,
            "name: t\ntasks:\n  - { id: wait, tool: slow, timeout: 1 }\n",
        )
        .await;

        let state = run.task("wait").unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.error.as_ref().unwrap().kind, "timeout");
    }

    #[tokio::test]
    async fn unknown_tool_fails_task() {
        let run = run_yaml(base_tools(), "name: t\ntasks:\n  - { id: a, tool: missing }\n").await;
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.task("a").unwrap().error.as_ref().unwrap().kind, "unknown_tool");
    }

    #[tokio::test]
    async fn for_loop_collects_results_without_leaking_loop_variable() {
        let run = run_yaml(
            base_tools(),
            r#"
name: loop
variables:
  items:
    - { id: a, n: 1 }
    - { id: b, n: 2 }
tasks:
  - id: each
    type: loop
    loop_type: for
    collection: "${items}"
    variable: item
    body:
      - id: work
        tool: echo
        parameters: { n: "${item.n}" }
        output_mapping:
          - { source: "$.n", target: "results.${item.id}" }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.context["results"], json!({"a": 1, "b": 2}));
        assert!(!run.context.contains_key("item"));
        assert_eq!(
            run.task("each").unwrap().result,
            Some(json!([{"work": {"n": 1}}, {"work": {"n": 2}}]))
        );
    }

    #[tokio::test]
    async fn for_loop_over_limit_fails() {
        let run = run_yaml(
            base_tools(),
            r#"
name: capped
variables: { items: [1, 2, 3] }
tasks:
  - id: each
    type: loop
    loop_type: for
    collection: "${items}"
    max_iterations: 2
    body:
      - { id: work, tool: echo }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Failed);
        let state = run.task("each").unwrap();
        assert_eq!(state.error.as_ref().unwrap().kind, "loop_limit_exceeded");
        assert_eq!(run.task("work").unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn while_loop_runs_until_condition_fails() {
        let mut tools = base_tools();
        tools.register_fn("increment", |params: Value| async move {
            let n = params["n"].as_i64().unwrap_or(0);
            Ok::<_, ToolError>(json!({ "n": n + 1 }))
        });
        let run = run_yaml(
            tools,
            r#"
name: counter
variables: { count: 0 }
tasks:
  - id: until_three
    type: loop
    loop_type: while
    condition:
      less: ["$count", 3]
    body:
      - id: bump
        tool: increment
        parameters: { n: "${count}" }
        output_mapping:
          - { source: "$.n", target: count }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.context["count"], json!(3));
        let iterations = run.task("until_three").unwrap().result.clone().unwrap();
        assert_eq!(iterations.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn while_loop_still_true_at_cap_fails() {
        let run = run_yaml(
            base_tools(),
            r#"
name: forever
tasks:
  - id: spin
    type: loop
    loop_type: while
    condition: true
    max_iterations: 2
    body:
      - { id: step, tool: echo }
"#,
        )
        .await;

        let state = run.task("spin").unwrap();
        assert_eq!(state.error.as_ref().unwrap().kind, "loop_limit_exceeded");
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn conditional_runs_one_branch_and_skips_the_other() {
        let run = run_yaml(
            base_tools(),
            r#"
name: branch
variables: { score: 95 }
tasks:
  - id: grade
    type: conditional
    condition:
      greater: ["$score", 90]
    then:
      - { id: high, tool: echo, parameters: { level: high } }
    else:
      - { id: low, tool: echo }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.task_status("high"), TaskStatus::Succeeded);
        let low = run.task("low").unwrap();
        assert_eq!(low.status, TaskStatus::Skipped);
        assert_eq!(low.skip_reason.as_deref(), Some("condition was true"));
        assert_eq!(
            run.task("grade").unwrap().result,
            Some(json!({"high": {"level": "high"}}))
        );
    }

    #[tokio::test]
    async fn compose_pipes_each_result_into_the_next() {
        let mut tools = base_tools();
        tools.register_fn("add_one", |params: Value| async move {
            let previous = params
                .get("_piped_input")
                .and_then(|p| p.get("value"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            Ok::<_, ToolError>(json!({ "value": previous + 1 }))
        });
        let run = run_yaml(
            tools,
            r#"
name: pipeline
tasks:
  - id: chain
    type: compose
    tasks:
      - { id: seed, tool: echo, parameters: { value: 1 } }
      - { id: plus1, tool: add_one }
      - { id: plus2, tool: add_one }
    output_mapping:
      - { source: "$.value", target: total }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.context["total"], json!(3));
        assert!(!run.context.contains_key("_piped_input"));
    }

    #[tokio::test]
    async fn max_concurrency_bounds_tool_calls() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tools.register_fn("track", move |_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ToolError>(Value::Null)
                }
            });
        }
        let run = run_yaml(
            tools,
            r#"
name: bounded
max_concurrency: 2
tasks:
  - id: all
    type: parallel
    tasks:
      - { id: t1, tool: track }
      - { id: t2, tool: track }
      - { id: t3, tool: track }
      - { id: t4, tool: track }
      - { id: t5, tool: track }
"#,
        )
        .await;

        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn resume_reruns_only_unfinished_nodes() {
        let healthy = Arc::new(AtomicBool::new(false));
        let prepare_calls = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        {
            let calls = Arc::clone(&prepare_calls);
            tools.register_fn("prepare", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, ToolError>(json!({"ready": true})) }
            });
            let healthy = Arc::clone(&healthy);
            tools.register_fn("publish", move |_| {
                let ok = healthy.load(Ordering::SeqCst);
                async move {
                    if ok {
                        Ok(json!("published"))
                    } else {
                        Err(ToolError::Unavailable("endpoint down".to_string()))
                    }
                }
            });
        }
        let def = parse_workflow_yaml(
            r#"
name: release
tasks:
  - id: prepare
    tool: prepare
    output_mapping:
      - { source: "$.ready", target: ready }
  - { id: publish, tool: publish, depends_on: [prepare] }
"#,
        )
        .unwrap();
        let engine = engine(tools);

        let first = engine.execute(&def, Map::new()).await.unwrap();
        assert_eq!(first.status, RunStatus::Failed);
        assert_eq!(first.task_status("prepare"), TaskStatus::Succeeded);

        healthy.store(true, Ordering::SeqCst);
        let resumed = engine.resume(first.id).await.unwrap();

        assert_eq!(resumed.id, first.id);
        assert_eq!(resumed.status, RunStatus::Succeeded);
        assert_eq!(prepare_calls.load(Ordering::SeqCst), 1);
        assert_eq!(resumed.context["ready"], json!(true));
        assert_eq!(resumed.task("publish").unwrap().result, Some(json!("published")));
        assert!(resumed.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_count_is_checkpointed_before_retry_delay() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut tools = ToolRegistry::new();
        tools.register_fn("flaky", move |params: Value| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(ToolError::Failed("warming up".to_string()))
                } else {
                    Ok(params)
                }
            }
        });
        let def = parse_workflow_yaml(
            r#"
name: flaky
tasks:
  - id: call
    tool: flaky
    retry: { max_attempts: 2, delay: 10 }
"#,
        )
        .unwrap();
        let engine = engine(tools);
        let run = engine.create_run(&def, Map::new());
        let run_id = run.id;

        let (finished, stored) = tokio::join!(engine.execute_run(&def, run), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            engine.load_run(run_id).await.unwrap()
        });

        let during_backoff = stored.task("call").unwrap();
        assert_eq!(during_backoff.status, TaskStatus::Running);
        assert_eq!(during_backoff.attempts, 1);

        let run = finished.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.task("call").unwrap().attempts, 2);
        assert_eq!(engine.load_run(run_id).await.unwrap().task("call").unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn resume_unknown_run_is_not_found() {
        let err = engine(base_tools()).resume(Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, EngineError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn cancel_interrupts_running_task() {
        let mut tools = base_tools();
        tools.register_fn("hang", |_| async move {
            std::future::pending::<Result<Value, ToolError>>().await
        });
        let def = parse_workflow_yaml(
            r#"
name: stuck
tasks:
  - { id: wait, tool: hang }
  - { id: after, tool: echo, depends_on: [wait] }
"#,
        )
        .unwrap();
        let engine = engine(tools);
        let run = engine.create_run(&def, Map::new());
        let run_id = run.id;

        let (finished, cancelled) = tokio::join!(engine.execute_run(&def, run), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            engine.cancel(run_id)
        });

        assert!(cancelled);
        let run = finished.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("run cancelled"));
        assert_eq!(run.task("wait").unwrap().error.as_ref().unwrap().kind, "cancelled");
        assert_eq!(run.task_status("after"), TaskStatus::Skipped);
        assert!(!engine.cancel(run_id));
        assert!(engine.active_runs().is_empty());
    }

    #[tokio::test]
    async fn invalid_definition_is_rejected_before_running() {
        let mut def = parse_workflow_yaml("name: t\ntasks:\n  - { id: a, tool: echo }\n").unwrap();
        def.tasks.clear();
        let err = engine(base_tools()).execute(&def, Map::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Workflow(WorkflowError::ValidationError(_))));
    }

    #[tokio::test]
    async fn dependency_cycle_is_rejected_before_any_tool_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut tools = ToolRegistry::new();
        tools.register_fn("count", move |params: Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, ToolError>(params) }
        });
        let def: WorkflowDefinition = serde_yaml_ng::from_str(
            r#"
name: cyclic
tasks:
  - { id: a, tool: count, depends_on: [b] }
  - { id: b, tool: count, depends_on: [a] }
"#,
        )
        .unwrap();

        let engine = engine(tools);
        let err = engine.execute(&def, Map::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Workflow(WorkflowError::CycleDetected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(engine.active_runs().is_empty());
    }

    #[tokio::test]
    async fn runs_are_checkpointed_and_listed() {
        let def = parse_workflow_yaml("name: t\ntasks:\n  - { id: a, tool: echo }\n").unwrap();
        let engine = engine(base_tools());
        let mut events = engine.events().subscribe();

        let run = engine
            .execute(&def, Map::from_iter([("input".to_string(), json!("x"))]))
            .await
            .unwrap();

        let stored = engine.load_run(run.id).await.unwrap();
        assert_eq!(stored, run);
        assert_eq!(stored.context["input"], json!("x"));
        assert_eq!(engine.list_runs().await.unwrap().len(), 1);

        let first = events.try_recv().unwrap();
        assert!(matches!(first, WorkflowEvent::RunStarted { resumed: false, .. }));
        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(WorkflowEvent::RunFinished { status: RunStatus::Succeeded, .. })
        ));
    }
}
