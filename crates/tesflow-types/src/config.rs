//! Engine configuration types for tesflow.
//!
//! `EngineConfig` represents the `tesflow.toml` file that controls
//! concurrency, timeouts, loop limits, run-state persistence, and the
//! table of externally executed command tools.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of tool calls in flight per run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-task timeout in seconds when neither workflow nor task sets one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Hard cap on loop iterations.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,

    /// Directory holding one sub-directory of persisted state per run.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Write run state after every transition.
    #[serde(default = "default_persist_state")]
    pub persist_state: bool,

    /// Command tools keyed by the name workflows reference in `tool:`.
    #[serde(default)]
    pub tools: BTreeMap<String, CommandToolConfig>,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_loop_iterations() -> usize {
    1000
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".workflow_state")
}

fn default_persist_state() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_timeout_secs: default_timeout_secs(),
            max_loop_iterations: default_max_loop_iterations(),
            state_dir: default_state_dir(),
            persist_state: default_persist_state(),
            tools: BTreeMap::new(),
        }
    }
}

/// An external executable exposed to workflows as a tool.
///
/// The engine writes the resolved parameters as JSON to the process's stdin
/// and parses its stdout as the JSON result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandToolConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Process-level timeout; the task timeout still applies on top.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}
