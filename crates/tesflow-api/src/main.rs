//! tesflow CLI entry point.
//!
//! Binary name: `tesflow`
//!
//! Parses CLI arguments, sets up tracing, loads the engine configuration,
//! wires the engine, then dispatches to the command handler.

mod cli;
mod state;

use std::process::ExitCode;

use clap::Parser;
use clap_complete::generate;
use tesflow_infra::config::{load_engine_config, resolve_config_path};
use tesflow_observe::tracing_setup::{init_tracing, shutdown_tracing, TracingOptions};
use tesflow_types::run::RunStatus;

use cli::run::RunDisplay;
use cli::{verbosity_filter, Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or engine state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "tesflow", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let options = TracingOptions {
        default_directive: verbosity_filter(cli.verbose, cli.quiet).to_string(),
        json: false,
        enable_otel: cli.otel,
    };
    if let Err(e) = init_tracing(&options) {
        eprintln!("warning: failed to initialize tracing: {e}");
    }

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = resolve_config_path(cli.config.as_deref());
    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "using engine config");
    }
    let config = load_engine_config(config_path.as_deref()).await;
    let state = AppState::init(config);

    let display = RunDisplay {
        json: cli.json,
        quiet: cli.quiet,
    };

    let code = match cli.command {
        Commands::Run {
            file,
            vars,
            vars_json,
        } => {
            let status =
                cli::run::handle_run(&state, &file, &vars, vars_json.as_deref(), display).await?;
            exit_code(status)
        }
        Commands::Resume { run_id } => {
            let status = cli::run::handle_resume(&state, &run_id, display).await?;
            exit_code(status)
        }
        Commands::Validate { file, sample } => {
            if cli::validate::handle_validate(&state, &file, sample.as_deref(), cli.json, cli.quiet)?
            {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Status { run_id } => {
            cli::status::handle_status(&state, &run_id, cli.json).await?;
            ExitCode::SUCCESS
        }
        Commands::List { limit } => {
            cli::status::handle_list(&state, limit, cli.json).await?;
            ExitCode::SUCCESS
        }
        Commands::Tools => {
            cli::tools::handle_tools(&state, cli.json)?;
            ExitCode::SUCCESS
        }
        Commands::Completions { .. } => ExitCode::SUCCESS,
    };
    Ok(code)
}

/// Failed runs exit with 1; tolerated failures still count as success.
fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
