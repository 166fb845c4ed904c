//! CLI command definitions for the `tesflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod output;
pub mod run;
pub mod status;
pub mod tools;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run declarative workflows of tool calls.
#[derive(Parser)]
#[command(name = "tesflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine config file (default: ./tesflow.toml).
    #[arg(long, global = true, env = "TESFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow file.
    Run {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,

        /// Set an input variable (`key=value`; the value is parsed as JSON
        /// when possible). Repeatable.
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Input variables as a JSON object, applied before `--var`.
        #[arg(long = "vars", value_name = "JSON")]
        vars_json: Option<String>,
    },

    /// Resume an interrupted or failed run from its checkpoint.
    Resume {
        /// Run UUID.
        run_id: String,
    },

    /// Parse and validate a workflow file without running it.
    Validate {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,

        /// Dry-run every output mapping against this sample tool output
        /// (inline JSON, or `@path` to read it from a file).
        #[arg(long, value_name = "JSON")]
        sample: Option<String>,
    },

    /// Show the state of a run.
    Status {
        /// Run UUID.
        run_id: String,
    },

    /// List stored runs, most recent first.
    #[command(alias = "ls")]
    List {
        /// Maximum number of runs to display.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List the tools workflows can call.
    Tools,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Filter directive for the verbosity flags.
pub fn verbosity_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn",
        1 => "info,tesflow_core=debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_repeated_vars() {
        let cli = Cli::parse_from([
            "tesflow", "run", "flow.yaml", "--var", "a=1", "--var", "b=x", "--json",
        ]);
        assert!(cli.json);
        match cli.command {
            Commands::Run { file, vars, vars_json } => {
                assert_eq!(file, PathBuf::from("flow.yaml"));
                assert_eq!(vars, vec!["a=1".to_string(), "b=x".to_string()]);
                assert!(vars_json.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn validate_accepts_sample() {
        let cli = Cli::parse_from(["tesflow", "validate", "flow.yaml", "--sample", "{\"a\": 1}"]);
        match cli.command {
            Commands::Validate { sample, .. } => assert_eq!(sample.as_deref(), Some("{\"a\": 1}")),
            _ => panic!("expected validate"),
        }
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(verbosity_filter(0, true), "error");
        assert_eq!(verbosity_filter(0, false), "warn");
        assert_eq!(verbosity_filter(2, false), "trace");
    }
}
