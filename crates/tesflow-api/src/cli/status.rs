//! `tesflow status` and `tesflow list`: inspect stored runs.

use anyhow::{bail, Result};
use comfy_table::Cell;
use console::style;
use tesflow_core::workflow::EngineError;
use tesflow_types::run::WorkflowRun;

use super::output::{self, parse_run_id, print_json};
use crate::state::AppState;

fn require_persistence(state: &AppState) -> Result<()> {
    if !state.persistent() {
        bail!("Run state persistence is disabled (persist_state = false); no runs are stored");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn handle_status(state: &AppState, run_id: &str, json: bool) -> Result<()> {
    require_persistence(state)?;
    let run_id = parse_run_id(run_id)?;
    let run = match state.engine.load_run(run_id).await {
        Ok(run) => run,
        Err(EngineError::RunNotFound(id)) => bail!("Run {id} not found"),
        Err(e) => return Err(anyhow::Error::new(e).context("Failed to load run")),
    };

    if json {
        return print_json(&run);
    }
    display_run(&run);
    Ok(())
}

fn display_run(run: &WorkflowRun) {
    println!();
    println!(
        "  Run {} ({})",
        style(run.id).cyan(),
        style(&run.workflow_name).bold()
    );
    println!("  Status:   {}", output::run_status(run.status));
    println!("  Started:  {}", run.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(finished) = run.finished_at {
        let secs = (finished - run.started_at).num_milliseconds() as f64 / 1000.0;
        println!(
            "  Finished: {} ({secs:.1}s)",
            finished.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(error) = &run.error {
        println!("  Error:    {}", style(error).red());
    }

    if !run.tasks.is_empty() {
        let mut table = output::table(&["Task", "Status", "Attempts", "Detail"]);
        for (id, task) in &run.tasks {
            let detail = match (&task.error, &task.skip_reason, &task.result) {
                (Some(error), _, _) if task.tolerated => {
                    format!("{} (tolerated)", error.message)
                }
                (Some(error), _, _) => error.message.clone(),
                (None, Some(reason), _) => reason.clone(),
                (None, None, Some(result)) => output::preview(result, 48),
                (None, None, None) => String::new(),
            };
            table.add_row(vec![
                Cell::new(id),
                Cell::new(output::task_status(task.status)),
                Cell::new(task.attempts),
                Cell::new(detail),
            ]);
        }
        println!();
        println!("{table}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn handle_list(state: &AppState, limit: usize, json: bool) -> Result<()> {
    require_persistence(state)?;
    let mut runs = state
        .engine
        .list_runs()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list runs: {e}"))?;
    runs.truncate(limit);

    if json {
        let out: Vec<_> = runs
            .iter()
            .map(|r| {
                serde_json::json!({
                    "run_id": r.id.to_string(),
                    "workflow_name": r.workflow_name,
                    "status": r.status,
                    "started_at": r.started_at.to_rfc3339(),
                    "finished_at": r.finished_at.map(|t| t.to_rfc3339()),
                    "error": r.error,
                })
            })
            .collect();
        return print_json(&out);
    }

    if runs.is_empty() {
        println!();
        println!("  No runs recorded.");
        println!(
            "  Start one with: {}",
            style("tesflow run <workflow.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = output::table(&["Run ID", "Workflow", "Status", "Tasks", "Started"]);
    for run in &runs {
        let done = run.tasks.values().filter(|t| t.status.is_terminal()).count();
        table.add_row(vec![
            Cell::new(run.id),
            Cell::new(&run.workflow_name),
            Cell::new(output::run_status(run.status)),
            Cell::new(format!("{done}/{}", run.tasks.len())),
            Cell::new(run.started_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
