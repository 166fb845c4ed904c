//! `tesflow run` and `tesflow resume`: execute a workflow with live progress.
//!
//! Progress comes from the engine's event bus. Ctrl-C requests cancellation
//! of the run instead of killing the process, so the final state is still
//! checkpointed and the run can be resumed later.

use std::future::Future;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use console::style;
use serde_json::{Map, Value};
use tesflow_core::workflow::definition::{load_workflow_file, WorkflowError};
use tesflow_core::workflow::EngineError;
use tesflow_types::event::WorkflowEvent;
use tesflow_types::run::{RunStatus, TaskStatus, WorkflowRun};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::Receiver;
use uuid::Uuid;

use super::output::{self, parse_run_id, print_json};
use crate::state::AppState;

/// How much the handler prints while the run progresses.
#[derive(Debug, Clone, Copy)]
pub struct RunDisplay {
    pub json: bool,
    pub quiet: bool,
}

impl RunDisplay {
    fn live(&self) -> bool {
        !self.json && !self.quiet
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Load `file`, execute it with the given inputs, and report the result.
pub async fn handle_run(
    state: &AppState,
    file: &Path,
    vars: &[String],
    vars_json: Option<&str>,
    display: RunDisplay,
) -> Result<RunStatus> {
    let def = load_workflow_file(file).map_err(|e| match e {
        WorkflowError::IoError(err) => {
            anyhow::anyhow!("Failed to read workflow file '{}': {err}", file.display())
        }
        other => anyhow::anyhow!("Invalid workflow '{}': {other}", file.display()),
    })?;
    let inputs = parse_inputs(vars_json, vars)?;

    let events = state.engine.events().subscribe();
    let run = state.engine.create_run(&def, inputs);
    let run_id = run.id;

    if display.live() {
        println!();
        println!(
            "  {} Running workflow '{}' ({} tasks)",
            style("*").cyan().bold(),
            style(&def.name).cyan(),
            def.all_nodes().len()
        );
        println!("  Run ID: {}", style(run_id).dim());
        println!();
    }

    let started = Instant::now();
    let run = follow_run(state, run_id, events, state.engine.execute_run(&def, run), display)
        .await
        .context("Workflow run aborted")?;
    report(state, &run, started, display)?;
    Ok(run.status)
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

pub async fn handle_resume(state: &AppState, run_id: &str, display: RunDisplay) -> Result<RunStatus> {
    if !state.persistent() {
        bail!("Run state persistence is disabled (persist_state = false); nothing to resume");
    }
    let run_id = parse_run_id(run_id)?;

    if display.live() {
        println!();
        println!(
            "  {} Resuming run {}",
            style("*").cyan().bold(),
            style(run_id).dim()
        );
        println!();
    }

    let events = state.engine.events().subscribe();
    let started = Instant::now();
    let run = follow_run(state, run_id, events, state.engine.resume(run_id), display)
        .await
        .map_err(|e| match e {
            EngineError::RunNotFound(id) => anyhow::anyhow!("Run {id} not found"),
            other => anyhow::Error::new(other).context("Failed to resume run"),
        })?;
    report(state, &run, started, display)?;
    Ok(run.status)
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Drive `execution` to completion, printing progress events for `run_id`
/// and turning Ctrl-C into a cancellation request.
async fn follow_run<F>(
    state: &AppState,
    run_id: Uuid,
    mut events: Receiver<WorkflowEvent>,
    execution: F,
    display: RunDisplay,
) -> Result<WorkflowRun, EngineError>
where
    F: Future<Output = Result<WorkflowRun, EngineError>>,
{
    tokio::pin!(execution);
    let mut cancel_requested = false;

    let result = loop {
        tokio::select! {
            result = &mut execution => break result,
            event = events.recv() => match event {
                Ok(event) if event.run_id() == run_id => print_event(&event, display),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "progress display fell behind the event bus");
                }
                Err(RecvError::Closed) => {}
            },
            signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                    continue;
                }
                if state.engine.cancel(run_id) && !display.json {
                    eprintln!("  {} Cancelling run...", style("!").yellow().bold());
                }
            }
        }
    };

    loop {
        match events.try_recv() {
            Ok(event) if event.run_id() == run_id => print_event(&event, display),
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    result
}

fn print_event(event: &WorkflowEvent, display: RunDisplay) {
    if !display.live() {
        return;
    }
    match event {
        WorkflowEvent::TaskStarted { task_id, node_type, .. } => {
            println!("  {} {} {}", style("›").dim(), task_id, style(node_type).dim());
        }
        WorkflowEvent::TaskRetrying {
            task_id,
            attempt,
            delay_ms,
            error,
            ..
        } => {
            println!(
                "  {} {} attempt {} failed, retrying in {}ms: {}",
                style("↻").yellow(),
                task_id,
                attempt,
                delay_ms,
                style(error).dim()
            );
        }
        WorkflowEvent::TaskSucceeded {
            task_id,
            duration_ms,
            ..
        } => {
            println!(
                "  {} {} {}",
                style("✓").green(),
                task_id,
                style(format!("{duration_ms}ms")).dim()
            );
        }
        WorkflowEvent::TaskFailed {
            task_id,
            error,
            tolerated,
            ..
        } => {
            let mark = if *tolerated {
                style("✗").yellow()
            } else {
                style("✗").red()
            };
            let suffix = if *tolerated { " (continuing)" } else { "" };
            println!("  {mark} {task_id}{suffix}: {error}");
        }
        WorkflowEvent::TaskSkipped { task_id, reason, .. } => {
            println!("  {} {} {}", style("-").yellow(), task_id, style(reason).dim());
        }
        WorkflowEvent::RunStarted { .. } | WorkflowEvent::RunFinished { .. } => {}
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

fn report(state: &AppState, run: &WorkflowRun, started: Instant, display: RunDisplay) -> Result<()> {
    if display.json {
        return print_json(run);
    }

    let failed = run.status == RunStatus::Failed;
    if display.quiet {
        if let Some(error) = run.error.as_deref().filter(|_| failed) {
            eprintln!("Run {} failed: {error}", run.id);
        }
        return Ok(());
    }

    let counts = run.status_counts();
    let count = |status: TaskStatus| counts.get(&status).copied().unwrap_or(0);

    println!();
    println!(
        "  Run {} {} in {:.1}s",
        style(run.id).dim(),
        output::run_status(run.status).bold(),
        started.elapsed().as_secs_f64()
    );
    println!(
        "  Tasks: {} succeeded, {} failed, {} skipped",
        count(TaskStatus::Succeeded),
        count(TaskStatus::Failed),
        count(TaskStatus::Skipped)
    );
    if let Some(error) = &run.error {
        println!("  Error: {}", style(error).red());
    }

    if !run.context.is_empty() {
        println!();
        println!("  Variables:");
        for (key, value) in &run.context {
            println!("    {} = {}", style(key).cyan(), output::preview(value, 60));
        }
    }

    println!();
    if state.persistent() {
        println!(
            "  Details: {}",
            style(format!("tesflow status {}", run.id)).dim()
        );
        if failed {
            println!(
                "  Resume:  {}",
                style(format!("tesflow resume {}", run.id)).dim()
            );
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Input parsing
// ---------------------------------------------------------------------------

/// Build the run inputs from `--vars` (a JSON object) and `--var k=v` pairs.
///
/// `--var` values are parsed as JSON when they are valid JSON and kept as
/// strings otherwise; they override keys from `--vars`.
pub fn parse_inputs(vars_json: Option<&str>, vars: &[String]) -> Result<Map<String, Value>> {
    let mut inputs = match vars_json {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("Invalid --vars JSON")? {
            Value::Object(map) => map,
            _ => bail!("--vars must be a JSON object"),
        },
        None => Map::new(),
    };
    for pair in vars {
        let (key, value) = parse_var(pair)?;
        inputs.insert(key, value);
    }
    Ok(inputs)
}

fn parse_var(pair: &str) -> Result<(String, Value)> {
    let (key, raw) = pair
        .split_once('=')
        .with_context(|| format!("Invalid --var '{pair}' (expected KEY=VALUE)"))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid --var '{pair}' (empty key)");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
