//! `tesflow validate`: parse a workflow file and show its execution plan.
//!
//! With `--sample`, every output mapping is also run against the sample
//! tool output and reported without executing anything.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color};
use console::style;
use serde_json::Value;
use tesflow_core::workflow::dag::build_execution_plan;
use tesflow_core::workflow::definition::load_workflow_file;
use tesflow_core::workflow::mapper::{MappingReport, OutputMapper};
use tesflow_types::workflow::{ExecutionMode, NodeKind, WorkflowDefinition};

use super::output::{self, print_json};
use crate::state::AppState;

/// Validate `file`. Returns `false` when the definition is invalid or, with
/// a sample, when any output mapping fails against it.
pub fn handle_validate(
    state: &AppState,
    file: &Path,
    sample: Option<&str>,
    json: bool,
    quiet: bool,
) -> Result<bool> {
    let sample = sample.map(parse_sample).transpose()?;

    let def = match load_workflow_file(file) {
        Ok(def) => def,
        Err(e) => {
            if json {
                print_json(&serde_json::json!({
                    "file": file.display().to_string(),
                    "valid": false,
                    "kind": e.kind(),
                    "error": e.to_string(),
                }))?;
            } else {
                eprintln!(
                    "  {} {}: {}",
                    style("✗").red().bold(),
                    file.display(),
                    e
                );
            }
            return Ok(false);
        }
    };

    let waves = build_execution_plan(&def.tasks)?;
    let unknown = unknown_tools(&def, |name| state.engine.tools().contains(name));
    let reports = sample
        .as_ref()
        .map(|sample| mapping_reports(&def, sample))
        .unwrap_or_default();
    let mappings_ok = reports.iter().all(|(_, report)| report.is_ok());

    if json {
        let waves: Vec<Vec<&str>> = waves
            .iter()
            .map(|wave| wave.iter().map(|n| n.id.as_str()).collect())
            .collect();
        return print_json(&serde_json::json!({
            "file": file.display().to_string(),
            "valid": true,
            "name": def.name,
            "execution": execution_name(def.execution),
            "tasks": def.tasks.len(),
            "nodes": def.all_nodes().len(),
            "waves": waves,
            "unknown_tools": unknown,
            "mappings": reports.iter().map(|(task, r)| report_json(task, r)).collect::<Vec<_>>(),
        }))
        .map(|()| mappings_ok);
    }
    if quiet {
        return Ok(mappings_ok);
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid",
        style("✓").green().bold(),
        style(&def.name).cyan()
    );
    if let Some(description) = &def.description {
        println!("  {}", style(description).dim());
    }
    println!(
        "  Top-level tasks: {}  (nodes including nested: {})",
        def.tasks.len(),
        def.all_nodes().len()
    );
    println!("  Execution: {}", execution_name(def.execution));
    println!();
    for (i, wave) in waves.iter().enumerate() {
        let ids: Vec<String> = wave
            .iter()
            .map(|n| format!("{} ({})", n.id, n.node_type().as_str()))
            .collect();
        println!("  Wave {}: {}", i + 1, ids.join(", "));
    }
    if !unknown.is_empty() {
        println!();
        println!(
            "  {} Tools not registered: {}",
            style("!").yellow().bold(),
            unknown.join(", ")
        );
    }
    if sample.is_some() {
        println!();
        print_reports(&reports);
        if !mappings_ok {
            println!(
                "  {} Some output mappings fail against the sample",
                style("✗").red().bold()
            );
        }
    }
    println!();
    Ok(mappings_ok)
}

/// Inline JSON, or `@path` to read the sample from a file.
fn parse_sample(raw: &str) -> Result<Value> {
    match raw.strip_prefix('@') {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read sample file '{path}'"))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid JSON in '{path}'"))
        }
        None => serde_json::from_str(raw).context("Invalid --sample JSON"),
    }
}

/// Dry-run every output mapping of every node, paired with its task id.
fn mapping_reports(def: &WorkflowDefinition, sample: &Value) -> Vec<(String, MappingReport)> {
    def.all_nodes()
        .into_iter()
        .flat_map(|node| {
            node.output_mapping
                .iter()
                .map(|mapping| (node.id.clone(), OutputMapper::validate(mapping, sample)))
        })
        .collect()
}

fn report_json(task: &str, report: &MappingReport) -> Value {
    serde_json::json!({
        "task": task,
        "source": report.source,
        "target": report.target,
        "found": report.found,
        "value": report.value,
        "transformed": report.transformed,
        "used_default": report.used_default,
        "error": report.error,
    })
}

fn print_reports(reports: &[(String, MappingReport)]) {
    if reports.is_empty() {
        println!("  No output mappings to check.");
        return;
    }
    let mut table = output::table(&["Task", "Source", "Target", "Result"]);
    for (task, report) in reports {
        let result = match (&report.error, &report.transformed) {
            (Some(error), _) => Cell::new(error).fg(Color::Red),
            (None, Some(value)) if report.used_default => {
                Cell::new(format!("default {}", output::preview(value, 40))).fg(Color::Yellow)
            }
            (None, Some(value)) => Cell::new(output::preview(value, 40)).fg(Color::Green),
            (None, None) => Cell::new("no match").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(task),
            Cell::new(&report.source),
            Cell::new(&report.target),
            result,
        ]);
    }
    println!("{table}");
}

fn execution_name(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::Dag => "dag",
        ExecutionMode::Sequential => "sequential",
    }
}

/// Tool names referenced by `def` that `known` rejects, sorted and deduplicated.
fn unknown_tools(def: &WorkflowDefinition, known: impl Fn(&str) -> bool) -> Vec<String> {
    let mut names: Vec<String> = def
        .all_nodes()
        .into_iter()
        .filter_map(|node| match &node.kind {
            NodeKind::Task { tool, .. } if !known(tool) => Some(tool.clone()),
            _ => None,
        })
        .collect();
    names.sort();
    names.dedup();
    names
}
