//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts YAML/JSON documents into the typed `WorkflowDefinition` AST,
//! assigns ids to anonymous nodes, validates structural constraints (unique
//! ids, sibling dependencies, acyclic blocks, well-formed mappings), and
//! provides discovery for workflow files on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tesflow_types::run::TaskError;
use tesflow_types::workflow::{LoopMode, NodeKind, TaskNode, WorkflowDefinition};
use thiserror::Error;

use super::dag;
use super::jsonpath::JsonPath;
use super::transform::Pipeline;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or executing a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A block's dependency graph contains a cycle.
    #[error("cycle detected among tasks [{}]", .cycle.join(", "))]
    CycleDetected { cycle: Vec<String> },

    /// A node depends on an id that is not a sibling in its block.
    #[error("task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },

    /// A required `$name` / `${...}` reference did not resolve.
    #[error("unresolved variable '{0}'")]
    UnresolvedVariable(String),

    /// A `required` output mapping found nothing and had no default.
    #[error("required output '{path}' produced no value for target '{target}'")]
    MissingRequiredOutput { path: String, target: String },

    /// A transform pipeline stage failed.
    #[error("transform stage '{stage}' failed on input {input}: {message}")]
    TransformError {
        stage: String,
        input: String,
        message: String,
    },

    /// Malformed JSONPath expression.
    #[error("invalid JSONPath '{path}': {message}")]
    JsonPath { path: String, message: String },

    /// Expression evaluation error.
    #[error("expression error: {0}")]
    ExpressionError(String),

    /// Invalid variable path for get/set.
    #[error("invalid variable path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The tool callable reported failure.
    #[error("task '{task_id}' failed: {message}")]
    TaskExecution { task_id: String, message: String },

    /// No tool registered under this name.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// A tool call exceeded its timeout.
    #[error("task '{task_id}' timed out after {timeout_secs}s")]
    Timeout { task_id: String, timeout_secs: u64 },

    /// Every attempt allowed by the retry policy failed.
    #[error("task '{task_id}' failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        task_id: String,
        attempts: u32,
        last_error: String,
    },

    /// A loop ran past its iteration cap.
    #[error("loop '{task_id}' exceeded the iteration limit of {limit}")]
    LoopLimitExceeded { task_id: String, limit: usize },

    /// The run was cancelled externally.
    #[error("run cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// Stable machine-readable kind, recorded in `TaskState.error.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::ParseError(_) => "parse_error",
            WorkflowError::ValidationError(_) => "validation_error",
            WorkflowError::IoError(_) => "io_error",
            WorkflowError::CycleDetected { .. } => "cycle_detected",
            WorkflowError::UnknownDependency { .. } => "unknown_dependency",
            WorkflowError::UnresolvedVariable(_) => "unresolved_variable",
            WorkflowError::MissingRequiredOutput { .. } => "missing_required_output",
            WorkflowError::TransformError { .. } => "transform_error",
            WorkflowError::JsonPath { .. } => "jsonpath_error",
            WorkflowError::ExpressionError(_) => "expression_error",
            WorkflowError::InvalidPath { .. } => "invalid_path",
            WorkflowError::TaskExecution { .. } => "task_execution_error",
            WorkflowError::UnknownTool(_) => "unknown_tool",
            WorkflowError::Timeout { .. } => "timeout",
            WorkflowError::RetryExhausted { .. } => "retry_exhausted",
            WorkflowError::LoopLimitExceeded { .. } => "loop_limit_exceeded",
            WorkflowError::Cancelled => "cancelled",
        }
    }

    /// Record form stored on a failed `TaskState`.
    pub fn to_task_error(&self) -> TaskError {
        TaskError {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
///
/// Anonymous nodes receive generated ids and `validate_definition` runs
/// afterwards, so the returned value is guaranteed to be structurally valid.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    prepare_definition(def)
}

/// Parse a JSON string into a validated `WorkflowDefinition`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    prepare_definition(def)
}

/// Assign missing ids and validate a definition built in code.
pub fn prepare_definition(
    mut def: WorkflowDefinition,
) -> Result<WorkflowDefinition, WorkflowError> {
    assign_missing_ids(&mut def.tasks, None);
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Give every anonymous node a deterministic id derived from its position:
/// `task-<i>` at the top level, `<parent>.<field>.<i>` below it.
fn assign_missing_ids(nodes: &mut [TaskNode], parent: Option<&str>) {
    for (index, node) in nodes.iter_mut().enumerate() {
        if node.id.is_empty() {
            node.id = match parent {
                Some(prefix) => format!("{prefix}.{index}"),
                None => format!("task-{index}"),
            };
        }
        let id = node.id.clone();
        for (label, block) in node.blocks_mut() {
            let prefix = format!("{id}.{label}");
            assign_missing_ids(block, Some(&prefix));
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - At least one task exists
/// - Every node id is non-empty and unique across all nesting levels
/// - `depends_on` references name a sibling in the same block
/// - No block contains a dependency cycle
/// - Retry policies, timeouts, and loop limits are in range
/// - Output mapping sources and transform pipelines parse
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.tasks.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one task".to_string(),
        ));
    }

    if def.max_concurrency == Some(0) {
        return Err(WorkflowError::ValidationError(
            "max_concurrency must be >= 1".to_string(),
        ));
    }
    if def.timeout_secs == Some(0) {
        return Err(WorkflowError::ValidationError(
            "timeout must be > 0".to_string(),
        ));
    }
    if def.max_loop_iterations == Some(0) {
        return Err(WorkflowError::ValidationError(
            "max_loop_iterations must be >= 1".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    validate_block(&def.tasks, &mut seen_ids)
}

fn validate_block<'a>(
    nodes: &'a [TaskNode],
    seen_ids: &mut HashSet<&'a str>,
) -> Result<(), WorkflowError> {
    for node in nodes {
        validate_node(node)?;
        if !seen_ids.insert(node.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate task ID: '{}'",
                node.id
            )));
        }
    }

    dag::validate_block(nodes)?;

    for node in nodes {
        for block in node.blocks() {
            validate_block(block, seen_ids)?;
        }
    }
    Ok(())
}

fn validate_node(node: &TaskNode) -> Result<(), WorkflowError> {
    let invalid = |message: String| {
        WorkflowError::ValidationError(format!("task '{}': {message}", node.id))
    };

    if node.id.is_empty() {
        return Err(WorkflowError::ValidationError(
            "task id must not be empty".to_string(),
        ));
    }

    if let Some(retry) = &node.retry {
        if retry.max_attempts < 1 {
            return Err(invalid("retry.max_attempts must be >= 1".to_string()));
        }
        if !retry.delay.is_finite() || retry.delay < 0.0 {
            return Err(invalid(format!(
                "retry.delay must be a non-negative number, got {}",
                retry.delay
            )));
        }
    }

    if node.timeout_secs == Some(0) {
        return Err(invalid("timeout must be > 0".to_string()));
    }

    match &node.kind {
        NodeKind::Task { tool, .. } if tool.trim().is_empty() => {
            return Err(invalid("tool must not be empty".to_string()));
        }
        NodeKind::Loop(spec) => {
            if spec.max_iterations == Some(0) {
                return Err(invalid("max_iterations must be >= 1".to_string()));
            }
            if let LoopMode::For { variable, .. } = &spec.mode {
                if variable.is_empty() || variable.contains('.') {
                    return Err(invalid(format!(
                        "loop variable '{variable}' must be a plain name"
                    )));
                }
            }
        }
        _ => {}
    }

    for mapping in &node.output_mapping {
        if mapping.target.trim().is_empty() {
            return Err(invalid("output_mapping target must not be empty".to_string()));
        }
        if mapping.source.starts_with('$') {
            JsonPath::parse(&mapping.source)?;
        }
        if let Some(transform) = &mapping.transform {
            Pipeline::parse(transform)?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a `.yaml`, `.yml`, or `.json` file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_workflow_json(&content),
        _ => parse_workflow_yaml(&content),
    }
}

/// Save a workflow definition to a YAML file.
///
/// Creates parent directories if they don't exist.
pub fn save_workflow_file(path: &Path, def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all workflow files under `base_dir`.
///
/// Scans for `.yaml`, `.yml`, and `.json` files recursively. Files that fail
/// to parse are skipped with a warning.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_workflow = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml" | "json")
        );
        if is_workflow {
            match load_workflow_file(&path) {
                Ok(def) => results.push((path, def)),
                Err(e) => {
                    tracing::warn!(?path, error = %e, "skipping unparseable workflow file");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
