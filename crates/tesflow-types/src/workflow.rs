//! Workflow definition types for tesflow.
//!
//! `WorkflowDefinition` is the typed AST the engine interprets. YAML and JSON
//! documents deserialize through a flat raw node shape (`RawTaskNode`) that is
//! converted into the typed `NodeKind` enum, so every node is validated for
//! its type-specific fields before anything runs. The reverse conversion is
//! used when a run persists its definition for later resumption.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::condition::Condition;
use crate::error::DefinitionError;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A parsed workflow: an ordered list of task nodes plus run-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable workflow name.
    #[serde(default = "default_workflow_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How the top-level block is scheduled.
    #[serde(default)]
    pub execution: ExecutionMode,
    /// Maximum in-flight tool calls for this workflow (overrides engine config).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Default per-task timeout in seconds (overrides engine config).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Loop iteration cap (overrides engine config).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_loop_iterations: Option<usize>,
    /// Initial variables seeded into the root context.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    /// Top-level task nodes. `steps` is accepted as a legacy alias.
    #[serde(alias = "steps")]
    pub tasks: Vec<TaskNode>,
}

fn default_workflow_name() -> String {
    "workflow".to_string()
}

/// Scheduling mode for the top-level block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Ready-set scheduling: every node whose dependencies are satisfied runs.
    #[default]
    Dag,
    /// Declaration order, one node at a time.
    Sequential,
}

impl WorkflowDefinition {
    /// Depth-first iterator over every node in the definition, nested ones included.
    pub fn all_nodes(&self) -> Vec<&TaskNode> {
        let mut out = Vec::new();
        for node in &self.tasks {
            node.collect_into(&mut out);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Task Node (typed AST)
// ---------------------------------------------------------------------------

/// One node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTaskNode", into = "RawTaskNode")]
pub struct TaskNode {
    /// Unique id within the run. Empty until assigned by the parser when the
    /// document omits it.
    pub id: String,
    /// Sibling node ids that must succeed before this node starts.
    pub depends_on: Vec<String>,
    pub retry: Option<RetryPolicy>,
    pub continue_on_error: bool,
    /// Per-node timeout in seconds for tool calls.
    pub timeout_secs: Option<u64>,
    /// Canonical output mappings, applied in order after a successful call.
    pub output_mapping: Vec<OutputMapping>,
    pub kind: NodeKind,
}

/// Node-type-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Invoke an external tool.
    Task {
        tool: String,
        parameters: Map<String, Value>,
    },
    /// Run children concurrently.
    Parallel { tasks: Vec<TaskNode> },
    /// Run `then` when the condition holds, else `otherwise`.
    Conditional {
        condition: Condition,
        then: Vec<TaskNode>,
        otherwise: Vec<TaskNode>,
    },
    Loop(LoopSpec),
    /// Run children in order, piping each raw result into the next.
    Compose { tasks: Vec<TaskNode> },
}

/// A `for` or `while` loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSpec {
    pub mode: LoopMode,
    pub body: Vec<TaskNode>,
    /// Per-loop iteration cap, overriding the workflow/engine default.
    pub max_iterations: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopMode {
    /// Iterate a collection, binding each element to `variable`.
    For { collection: Value, variable: String },
    /// Re-evaluate `condition` before each iteration.
    While { condition: Condition },
}

/// Discriminant of `NodeKind`, as written in the `type` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[default]
    Task,
    Parallel,
    Conditional,
    Loop,
    Compose,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Task => "task",
            NodeType::Parallel => "parallel",
            NodeType::Conditional => "conditional",
            NodeType::Loop => "loop",
            NodeType::Compose => "compose",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    #[default]
    For,
    While,
}

fn default_loop_variable() -> String {
    "item".to_string()
}

impl TaskNode {
    /// Build a leaf task node with default settings.
    pub fn task(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self::with_kind(
            id,
            NodeKind::Task {
                tool: tool.into(),
                parameters: Map::new(),
            },
        )
    }

    /// Build a node of any kind with default settings.
    pub fn with_kind(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            retry: None,
            continue_on_error: false,
            timeout_secs: None,
            output_mapping: Vec::new(),
            kind,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match &self.kind {
            NodeKind::Task { .. } => NodeType::Task,
            NodeKind::Parallel { .. } => NodeType::Parallel,
            NodeKind::Conditional { .. } => NodeType::Conditional,
            NodeKind::Loop(_) => NodeType::Loop,
            NodeKind::Compose { .. } => NodeType::Compose,
        }
    }

    /// Nested blocks owned by this node (empty for leaf tasks).
    pub fn blocks(&self) -> Vec<&[TaskNode]> {
        match &self.kind {
            NodeKind::Task { .. } => Vec::new(),
            NodeKind::Parallel { tasks } | NodeKind::Compose { tasks } => vec![tasks.as_slice()],
            NodeKind::Conditional {
                then, otherwise, ..
            } => vec![then.as_slice(), otherwise.as_slice()],
            NodeKind::Loop(spec) => vec![spec.body.as_slice()],
        }
    }

    /// Mutable access to nested blocks, labelled by the field that holds them.
    pub fn blocks_mut(&mut self) -> Vec<(&'static str, &mut Vec<TaskNode>)> {
        match &mut self.kind {
            NodeKind::Task { .. } => Vec::new(),
            NodeKind::Parallel { tasks } | NodeKind::Compose { tasks } => vec![("tasks", tasks)],
            NodeKind::Conditional {
                then, otherwise, ..
            } => vec![("then", then), ("else", otherwise)],
            NodeKind::Loop(spec) => vec![("body", &mut spec.body)],
        }
    }

    /// This node followed by all of its descendants, depth first.
    pub fn descendants(&self) -> Vec<&TaskNode> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a TaskNode>) {
        out.push(self);
        for block in self.blocks() {
            for child in block {
                child.collect_into(out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Raw document form
// ---------------------------------------------------------------------------

/// Flat on-disk shape of a task node; every type-specific field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTaskNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "OutputMappingSpec::is_empty")]
    pub output_mapping: OutputMappingSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_on_error: bool,
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<Vec<TaskNode>>,
    #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
    pub else_: Option<Vec<TaskNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_type: Option<LoopType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<TaskNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl TryFrom<RawTaskNode> for TaskNode {
    type Error = DefinitionError;

    fn try_from(raw: RawTaskNode) -> Result<Self, Self::Error> {
        let id = raw.id.unwrap_or_default();
        let invalid = |message: &str| DefinitionError::InvalidNode {
            id: if id.is_empty() {
                "<unnamed>".to_string()
            } else {
                id.clone()
            },
            message: message.to_string(),
        };

        let kind = match raw.node_type {
            NodeType::Task => NodeKind::Task {
                tool: raw.tool.ok_or_else(|| invalid("task node requires 'tool'"))?,
                parameters: raw.parameters,
            },
            NodeType::Parallel => NodeKind::Parallel {
                tasks: raw
                    .tasks
                    .ok_or_else(|| invalid("parallel node requires 'tasks'"))?,
            },
            NodeType::Compose => NodeKind::Compose {
                tasks: raw
                    .tasks
                    .ok_or_else(|| invalid("compose node requires 'tasks'"))?,
            },
            NodeType::Conditional => NodeKind::Conditional {
                condition: raw
                    .condition
                    .ok_or_else(|| invalid("conditional node requires 'condition'"))?,
                then: raw.then.unwrap_or_default(),
                otherwise: raw.else_.unwrap_or_default(),
            },
            NodeType::Loop => {
                let mode = match raw.loop_type.unwrap_or_default() {
                    LoopType::For => LoopMode::For {
                        collection: raw
                            .collection
                            .ok_or_else(|| invalid("for loop requires 'collection'"))?,
                        variable: raw.variable.unwrap_or_else(default_loop_variable),
                    },
                    LoopType::While => LoopMode::While {
                        condition: raw
                            .condition
                            .ok_or_else(|| invalid("while loop requires 'condition'"))?,
                    },
                };
                NodeKind::Loop(LoopSpec {
                    mode,
                    body: raw.body.ok_or_else(|| invalid("loop node requires 'body'"))?,
                    max_iterations: raw.max_iterations,
                })
            }
        };

        let output_mapping = raw.output_mapping.expand().map_err(|m| invalid(&m))?;
        Ok(TaskNode {
            id,
            depends_on: raw.depends_on,
            retry: raw.retry,
            continue_on_error: raw.continue_on_error,
            timeout_secs: raw.timeout_secs,
            output_mapping,
            kind,
        })
    }
}

impl From<TaskNode> for RawTaskNode {
    fn from(node: TaskNode) -> Self {
        let mut raw = RawTaskNode {
            id: (!node.id.is_empty()).then_some(node.id),
            node_type: NodeType::Task,
            depends_on: node.depends_on,
            output_mapping: OutputMappingSpec::Canonical(node.output_mapping),
            retry: node.retry,
            continue_on_error: node.continue_on_error,
            timeout_secs: node.timeout_secs,
            ..Default::default()
        };
        match node.kind {
            NodeKind::Task { tool, parameters } => {
                raw.tool = Some(tool);
                raw.parameters = parameters;
            }
            NodeKind::Parallel { tasks } => {
                raw.node_type = NodeType::Parallel;
                raw.tasks = Some(tasks);
            }
            NodeKind::Compose { tasks } => {
                raw.node_type = NodeType::Compose;
                raw.tasks = Some(tasks);
            }
            NodeKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                raw.node_type = NodeType::Conditional;
                raw.condition = Some(condition);
                raw.then = Some(then);
                raw.else_ = (!otherwise.is_empty()).then_some(otherwise);
            }
            NodeKind::Loop(spec) => {
                raw.node_type = NodeType::Loop;
                raw.body = Some(spec.body);
                raw.max_iterations = spec.max_iterations;
                match spec.mode {
                    LoopMode::For {
                        collection,
                        variable,
                    } => {
                        raw.loop_type = Some(LoopType::For);
                        raw.collection = Some(collection);
                        raw.variable = Some(variable);
                    }
                    LoopMode::While { condition } => {
                        raw.loop_type = Some(LoopType::While);
                        raw.condition = Some(condition);
                    }
                }
            }
        }
        raw
    }
}

// ---------------------------------------------------------------------------
// Output Mapping
// ---------------------------------------------------------------------------

/// Declarative rule extracting part of a task result into a context variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMapping {
    /// JSONPath into the raw result (plain dot notation when not starting with `$`).
    pub source: String,
    /// Dotted variable path; may contain `${...}` placeholders.
    pub target: String,
    /// `|`-delimited transform pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    /// Value used when extraction yields nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Fail the task when extraction yields nothing and no default exists.
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
}

impl OutputMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            transform: None,
            default: None,
            required: false,
        }
    }
}

/// `output_mapping` as written in a document: canonical list or legacy map.
///
/// ```yaml
/// output_mapping:          # legacy
///   result_key: target_var
/// output_mapping:          # canonical
///   - source: $.result_key
///     target: target_var
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputMappingSpec {
    Canonical(Vec<OutputMapping>),
    /// Result key -> target, in declaration order.
    Legacy(Map<String, Value>),
}

impl Default for OutputMappingSpec {
    fn default() -> Self {
        OutputMappingSpec::Canonical(Vec::new())
    }
}

impl OutputMappingSpec {
    pub fn is_empty(&self) -> bool {
        match self {
            OutputMappingSpec::Canonical(list) => list.is_empty(),
            OutputMappingSpec::Legacy(map) => map.is_empty(),
        }
    }

    /// Expand into canonical form, keeping declaration order. Canonical input
    /// is returned unchanged; a legacy target that is not a string is rejected.
    pub fn expand(self) -> Result<Vec<OutputMapping>, String> {
        match self {
            OutputMappingSpec::Canonical(list) => Ok(list),
            OutputMappingSpec::Legacy(map) => map
                .into_iter()
                .map(|(key, target)| {
                    let Value::String(target) = target else {
                        return Err(format!(
                            "legacy output_mapping target for '{key}' must be a string, got {target}"
                        ));
                    };
                    let source = if key.starts_with('$') {
                        key
                    } else {
                        format!("$.{key}")
                    };
                    Ok(OutputMapping::new(source, target))
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Retry policy for a task node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts, in seconds.
    #[serde(default = "default_retry_delay")]
    pub delay: f64,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: default_retry_delay(),
            backoff: Backoff::default(),
        }
    }
}

/// Wait strategy between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Fixed `delay` between attempts.
    #[default]
    None,
    /// `delay * 2^(attempt-1)`.
    Exponential,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Comparator;
    use serde_json::json;

    const SAMPLE: &str = r#"
name: nightly-report
execution: dag
variables:
  threshold: 90
tasks:
  - id: fetch
    tool: http_get
    parameters:
      url: "https://example.test/data"
    output_mapping:
      - source: "$.data.items"
        target: items
        transform: array
    retry:
      max_attempts: 3
      delay: 2
      backoff: exponential
  - id: branch
    type: conditional
    depends_on: [fetch]
    condition:
      greater: ["$score", 90]
    then:
      - id: fan_out
        type: parallel
        tasks:
          - { id: a, tool: process }
          - { id: b, tool: process, continue_on_error: true }
    else:
      - { id: empty, tool: log }
  - id: each
    type: loop
    collection: "$items"
    body:
      - id: handle
        tool: process
        output_mapping:
          result: "results.${item.id}"
  - id: chain
    type: compose
    tasks:
      - { id: c1, tool: extract }
      - { id: c2, tool: load }
"#;

    #[test]
    fn test_parse_sample_document() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(SAMPLE).unwrap();
        assert_eq!(def.name, "nightly-report");
        assert_eq!(def.execution, ExecutionMode::Dag);
        assert_eq!(def.variables["threshold"], json!(90));
        assert_eq!(def.tasks.len(), 4);

        let fetch = &def.tasks[0];
        assert_eq!(fetch.node_type(), NodeType::Task);
        assert_eq!(fetch.output_mapping[0].transform.as_deref(), Some("array"));
        let retry = fetch.retry.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.backoff, Backoff::Exponential);

        let NodeKind::Conditional {
            condition,
            then,
            otherwise,
        } = &def.tasks[1].kind
        else {
            panic!("expected conditional");
        };
        assert!(matches!(
            condition,
            Condition::Compare {
                op: Comparator::Greater,
                ..
            }
        ));
        assert_eq!(then[0].node_type(), NodeType::Parallel);
        assert_eq!(otherwise[0].id, "empty");

        let NodeKind::Loop(spec) = &def.tasks[2].kind else {
            panic!("expected loop");
        };
        assert!(matches!(
            &spec.mode,
            LoopMode::For { variable, .. } if variable == "item"
        ));
        // Legacy mapping expanded at parse time.
        assert_eq!(
            spec.body[0].output_mapping,
            vec![OutputMapping::new("$.result", "results.${item.id}")]
        );
    }

    #[test]
    fn test_steps_alias_and_default_type() {
        let def: WorkflowDefinition =
            serde_yaml_ng::from_str("steps:\n  - id: only\n    tool: echo\n").unwrap();
        assert_eq!(def.name, "workflow");
        assert_eq!(def.tasks[0].node_type(), NodeType::Task);
    }

    #[test]
    fn test_missing_type_specific_field_rejected() {
        let result: Result<WorkflowDefinition, _> =
            serde_yaml_ng::from_str("tasks:\n  - id: p\n    type: parallel\n");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("parallel node requires 'tasks'"), "got: {err}");

        let result: Result<WorkflowDefinition, _> =
            serde_yaml_ng::from_str("tasks:\n  - id: t\n    parameters: {}\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_definition_round_trips_through_raw_form() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(SAMPLE).unwrap();
        let json = serde_json::to_string(&def).unwrap();
        let back: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(def, back);
    }

    #[test]
    fn test_legacy_expansion_is_idempotent() {
        let mut legacy = Map::new();
        legacy.insert("status".to_string(), json!("last_status"));
        legacy.insert("$.data.count".to_string(), json!("count"));

        let once = OutputMappingSpec::Legacy(legacy).expand().unwrap();
        let twice = OutputMappingSpec::Canonical(once.clone()).expand().unwrap();
        assert_eq!(once, twice);
        assert_eq!(
            once,
            vec![
                OutputMapping::new("$.status", "last_status"),
                OutputMapping::new("$.data.count", "count"),
            ]
        );
    }

    #[test]
    fn test_legacy_expansion_keeps_declaration_order() {
        let yaml = "tasks:\n  - id: t\n    tool: echo\n    output_mapping:\n      zeta: first\n      alpha: second\n";
        let def: WorkflowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        let targets: Vec<&str> = def.tasks[0]
            .output_mapping
            .iter()
            .map(|m| m.target.as_str())
            .collect();
        assert_eq!(targets, vec!["first", "second"]);
    }

    #[test]
    fn test_legacy_target_must_be_a_string() {
        let yaml = "tasks:\n  - id: t\n    tool: echo\n    output_mapping:\n      count: 3\n";
        let result: Result<WorkflowDefinition, _> = serde_yaml_ng::from_str(yaml);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("must be a string"), "got: {err}");
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy: RetryPolicy = serde_json::from_value(json!({})).unwrap();
        assert_eq!(policy, RetryPolicy::default());
        assert_eq!(policy.backoff, Backoff::None);
    }

    #[test]
    fn test_while_loop_requires_condition() {
        let yaml = "tasks:\n  - id: w\n    type: loop\n    loop_type: while\n    body: []\n";
        let result: Result<WorkflowDefinition, _> = serde_yaml_ng::from_str(yaml);
        assert!(result.unwrap_err().to_string().contains("requires 'condition'"));
    }

    #[test]
    fn test_all_nodes_walks_nested_blocks() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(SAMPLE).unwrap();
        let ids: Vec<&str> = def.all_nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["fetch", "branch", "fan_out", "a", "b", "empty", "each", "handle", "chain", "c1", "c2"]
        );
    }
}
