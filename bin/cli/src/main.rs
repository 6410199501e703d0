//! `taskflow`: validate, plan and dry-run workflow definitions.

mod config;
mod dry_run;
mod error;

use crate::config::CliConfig;
use crate::dry_run::DryRunExecutor;
use crate::error::CliError;
use clap::{Parser, Subcommand};
use rootcause::prelude::{Report, ResultExt};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use taskflow_core::WorkflowId;
use taskflow_workflow::{
    Engine, ExecutorRegistry, FileWorkflowStore, LogEntry, LogEvent, NodeType, RunHandle,
    TerminalReason, Workflow, WorkflowStore, build_plan,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "taskflow", version, about = "Workflow automation engine")]
struct Cli {
    /// Directory of stored workflows (overrides TASKFLOW__STORE_DIR)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow file for errors
    Validate {
        /// Workflow JSON file
        file: PathBuf,
    },
    /// Show the levels a workflow file would run in
    Plan {
        /// Workflow JSON file
        file: PathBuf,
    },
    /// Run a workflow file; actions are recorded, not performed
    Run {
        /// Workflow JSON file
        file: PathBuf,
        /// Run input variable, repeatable. Values that are not JSON are taken as strings.
        #[arg(long = "input", value_name = "KEY=JSON")]
        inputs: Vec<String>,
    },
    /// Copy a workflow file into the store
    Import {
        /// Workflow JSON file
        file: PathBuf,
    },
    /// Write a stored workflow to a file
    Export {
        /// Workflow id (wf_…)
        id: String,
        /// Destination file
        file: PathBuf,
    },
    /// List stored workflows
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let outcome = match CliConfig::from_env() {
        Ok(mut config) => {
            if let Some(store_dir) = cli.store_dir {
                config.store_dir = store_dir;
            }
            dispatch(cli.command, config).await
        }
        Err(e) => Err(CliError::Config {
            reason: e.to_string(),
        }
        .into()),
    };

    match outcome {
        Ok(code) => code,
        Err(report) => {
            eprintln!("error: {report}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands, config: CliConfig) -> Result<ExitCode, Report<CliError>> {
    match command {
        Commands::Validate { file } => validate(&file).await,
        Commands::Plan { file } => plan(&file).await,
        Commands::Run { file, inputs } => run(&file, &inputs, config).await,
        Commands::Import { file } => import(&file, &config).await,
        Commands::Export { id, file } => export(&id, &file, &config).await,
        Commands::List => list(&config).await,
    }
}

async fn read_workflow(path: &Path) -> Result<Workflow, Report<CliError>> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CliError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(Workflow::import_json(&json).map_err(|e| CliError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?)
}

async fn validate(file: &Path) -> Result<ExitCode, Report<CliError>> {
    let workflow = read_workflow(file).await?;
    match build_plan(workflow.graph()) {
        Ok(plan) => {
            println!(
                "{}: valid, {} node(s) in {} level(s)",
                workflow.name(),
                plan.node_count(),
                plan.levels().len()
            );
            for warning in plan.warnings() {
                println!("warning: {warning}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            println!("{}: {err}", workflow.name());
            let nodes: Vec<&str> = err.node_ids().into_iter().map(|id| id.as_str()).collect();
            if !nodes.is_empty() {
                println!("  affected nodes: {}", nodes.join(", "));
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn plan(file: &Path) -> Result<ExitCode, Report<CliError>> {
    let workflow = read_workflow(file).await?;
    let plan = build_plan(workflow.graph()).context(CliError::Invalid)?;
    for (index, level) in plan.levels().iter().enumerate() {
        println!("level {index}:");
        for planned in level.iter().filter_map(|node_id| plan.node(node_id)) {
            println!(
                "  {} ({}) \"{}\"",
                planned.id(),
                planned.node_type(),
                planned.node.title
            );
        }
    }
    for warning in plan.warnings() {
        println!("warning: {warning}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(
    file: &Path,
    inputs: &[String],
    config: CliConfig,
) -> Result<ExitCode, Report<CliError>> {
    let workflow = read_workflow(file).await?;
    let input = parse_inputs(inputs)?;

    let actions = Arc::new(DryRunExecutor::new());
    let mut registry = ExecutorRegistry::with_builtins();
    registry.register_shared(NodeType::Action, actions.clone());
    let engine = Engine::new(registry, config.engine);

    let handle = engine
        .start_run_with_input(&workflow, input)
        .context(CliError::Run)?;
    info!(run_id = %handle.run_id(), workflow = workflow.name(), "following run; Ctrl-C cancels");
    follow(&handle).await;

    let status = handle.wait().await;
    println!();
    for (node_id, node_status) in &status.node_statuses {
        println!("  {node_id}: {node_status}");
    }
    println!("dry-run actions recorded: {}", actions.recorded().len());

    match status.terminal_reason {
        Some(TerminalReason::Completed) => Ok(ExitCode::SUCCESS),
        _ => Ok(ExitCode::FAILURE),
    }
}

/// Prints log entries as they are appended until the run finishes.
/// The first Ctrl-C cancels the run.
async fn follow(handle: &RunHandle) {
    let mut live = handle.subscribe();
    let snapshot = handle.status();
    let mut next_seq = print_new(&snapshot.log, 1);
    if snapshot.is_finished() {
        return;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            received = live.recv() => match received {
                Ok(entry) => {
                    if entry.seq < next_seq {
                        continue;
                    }
                    println!("{entry}");
                    next_seq = entry.seq + 1;
                    if matches!(entry.event, LogEvent::RunFinished { .. }) {
                        return;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "log output fell behind; catching up");
                    let snapshot = handle.status();
                    next_seq = print_new(&snapshot.log, next_seq);
                    if snapshot.is_finished() {
                        return;
                    }
                }
                Err(RecvError::Closed) => return,
            },
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                match signal {
                    Ok(()) => {
                        info!("cancelling run");
                        handle.cancel();
                    }
                    Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
                }
            }
        }
    }
}

/// Prints entries from `next_seq` on and returns the next unseen sequence number.
fn print_new(log: &[LogEntry], next_seq: u64) -> u64 {
    let mut next = next_seq;
    for entry in log.iter().filter(|entry| entry.seq >= next_seq) {
        println!("{entry}");
        next = entry.seq + 1;
    }
    next
}

fn parse_inputs(arguments: &[String]) -> Result<Map<String, JsonValue>, Report<CliError>> {
    let mut input = Map::new();
    for argument in arguments {
        let Some((key, raw)) = argument.split_once('=') else {
            return Err(CliError::Input {
                argument: argument.clone(),
                reason: "expected KEY=JSON".to_string(),
            }
            .into());
        };
        if key.is_empty() {
            return Err(CliError::Input {
                argument: argument.clone(),
                reason: "empty key".to_string(),
            }
            .into());
        }
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()));
        input.insert(key.to_string(), value);
    }
    Ok(input)
}

async fn import(file: &Path, config: &CliConfig) -> Result<ExitCode, Report<CliError>> {
    let workflow = read_workflow(file).await?;
    if let Err(err) = build_plan(workflow.graph()) {
        warn!(error = %err, "importing a workflow that cannot run yet");
    }
    let store = FileWorkflowStore::new(&config.store_dir);
    store
        .save_workflow(&workflow)
        .await
        .context(CliError::Store)?;
    println!("imported \"{}\" as {}", workflow.name(), workflow.id);
    Ok(ExitCode::SUCCESS)
}

async fn export(id: &str, file: &Path, config: &CliConfig) -> Result<ExitCode, Report<CliError>> {
    let workflow_id: WorkflowId = id.parse().map_err(|_| CliError::WorkflowId {
        value: id.to_string(),
    })?;
    let store = FileWorkflowStore::new(&config.store_dir);
    let workflow = store
        .load_workflow(workflow_id)
        .await
        .context(CliError::Store)?;
    let json = workflow.export_json().map_err(|e| CliError::File {
        path: file.to_path_buf(),
        reason: e.to_string(),
    })?;
    tokio::fs::write(file, json)
        .await
        .map_err(|e| CliError::File {
            path: file.to_path_buf(),
            reason: e.to_string(),
        })?;
    println!("exported {workflow_id} to {}", file.display());
    Ok(ExitCode::SUCCESS)
}

async fn list(config: &CliConfig) -> Result<ExitCode, Report<CliError>> {
    let store = FileWorkflowStore::new(&config.store_dir);
    let summaries = store.list_workflows().await.context(CliError::Store)?;
    if summaries.is_empty() {
        println!("no workflows in {}", config.store_dir.display());
    }
    for summary in summaries {
        println!(
            "{}  {}  {} node(s)  {}  updated {}",
            summary.id,
            summary.name,
            summary.node_count,
            if summary.is_active { "active" } else { "inactive" },
            summary.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(ExitCode::SUCCESS)
}
