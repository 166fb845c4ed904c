//! Workflow engine core: definition parsing, block scheduling, data flow
//! between tasks, and durable checkpointing.
//!
//! - `definition` -- YAML/JSON parsing, validation, filesystem load/save
//! - `dag` -- per-block dependency graphs, cycle detection, execution waves
//! - `context` -- shared variable store with private per-scope bindings
//! - `template` -- `${...}` placeholder resolution
//! - `expression` -- JEXL evaluator for conditions, filters, and transforms
//! - `condition` -- typed condition tree evaluation
//! - `jsonpath` -- JSONPath selection over task results
//! - `transform` -- `|`-separated transform pipelines
//! - `mapper` -- output mappings from raw results into the context
//! - `retry` -- retry policy arithmetic
//! - `checkpoint` -- durable checkpoint manager for resume
//! - `runtime` -- per-run state and transition recording
//! - `scheduler` -- ready-set scheduling of one block
//! - `executor` -- `task` node execution against the tool registry
//! - `handlers` -- node dispatch and the composite node types
//! - `engine` -- `WorkflowEngine`: run, resume, cancel

pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod expression;
pub mod handlers;
pub mod jsonpath;
pub mod mapper;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod template;
pub mod transform;

pub use definition::WorkflowError;
pub use engine::{EngineError, WorkflowEngine};
