//! Resumable workflow pipeline CLI.
//!
//! Runs a YAML workflow in a fresh numbered workspace, resumes an earlier
//! run, and reports on existing workspaces.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pipeline::core::state::{RunStatus, StateSummary, WorkflowState, summarize};
use pipeline::exit_codes;
use pipeline::io::config::{DEFAULT_CONFIG_FILE, PipelineConfig, load_config};
use pipeline::io::state_store;
use pipeline::io::workflow_file::{load_workflow, validate_workflow};
use pipeline::io::workspace::{create_workspace, get_workspace, list_workspaces};
use pipeline::logging;
use pipeline::orchestrator::Orchestrator;

/// Directory searched for `<workflow_name>.yaml` when resuming without `--workflow`.
const WORKFLOWS_DIR: &str = "workflows";

#[derive(Parser)]
#[command(
    name = "pipeline",
    version,
    about = "Resumable workflow pipeline for agent-driven steps"
)]
struct Cli {
    /// Config file (defaults to `pipeline.toml` if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the workspaces base directory.
    #[arg(long, global = true)]
    workspaces_dir: Option<PathBuf>,
    /// Log progress to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a workflow in a new workspace.
    Run {
        /// Workflow YAML file.
        #[arg(short, long)]
        workflow: PathBuf,
        /// Problem description copied into the workspace context.
        #[arg(short, long)]
        problem: Option<PathBuf>,
    },
    /// Resume a failed or interrupted run.
    Resume {
        /// Workspace id (e.g. `00003`).
        #[arg(long)]
        workspace: String,
        /// Workflow YAML file (defaults to `workflows/<workflow_name>.yaml`).
        #[arg(short, long)]
        workflow: Option<PathBuf>,
    },
    /// Show the state of a run.
    Status {
        #[arg(long)]
        workspace: String,
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List workspaces, newest first.
    List,
    /// Check a workflow file without running it.
    Validate {
        #[arg(short, long)]
        workflow: PathBuf,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config = resolve_config(cli.config.as_deref(), cli.workspaces_dir)?;
    match cli.command {
        Command::Run { workflow, problem } => cmd_run(&config, &workflow, problem.as_deref()),
        Command::Resume {
            workspace,
            workflow,
        } => cmd_resume(&config, &workspace, workflow.as_deref()),
        Command::Status { workspace, json } => cmd_status(&config, &workspace, json),
        Command::List => cmd_list(&config),
        Command::Validate { workflow } => cmd_validate(&config, &workflow),
    }
}

fn resolve_config(path: Option<&Path>, workspaces_dir: Option<PathBuf>) -> Result<PipelineConfig> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    let mut config = load_config(path)?;
    if let Some(dir) = workspaces_dir {
        config.workspaces_dir = dir;
    }
    Ok(config)
}

fn cmd_run(config: &PipelineConfig, workflow_path: &Path, problem: Option<&Path>) -> Result<i32> {
    let workflow = load_workflow(workflow_path, &config.default_backend)?;
    ensure_valid(&workflow_path.display().to_string(), &validate_workflow(&workflow))?;
    if let Some(path) = problem
        && !path.is_file()
    {
        bail!("problem file not found: {}", path.display());
    }

    let workspace = create_workspace(&config.workspaces_dir, None)?;
    println!("workspace {} ({})", workspace.id, workspace.root.display());

    let orchestrator = Orchestrator::from_config(config);
    let state = orchestrator
        .run(&workflow, &workspace, problem, &BTreeMap::new())
        .with_context(|| format!("run workflow {}", workflow.name))?;
    print_summary(&summarize(&state));
    print_steps(&state);
    Ok(outcome_code(&state))
}

fn cmd_resume(config: &PipelineConfig, id: &str, workflow_path: Option<&Path>) -> Result<i32> {
    let workspace = get_workspace(&config.workspaces_dir, id)?;
    let workflow_path = match workflow_path {
        Some(path) => path.to_path_buf(),
        None => {
            let state = state_store::load(&workspace)?
                .with_context(|| format!("no state found in workspace {id}"))?;
            Path::new(WORKFLOWS_DIR).join(format!("{}.yaml", state.workflow_name))
        }
    };
    let workflow = load_workflow(&workflow_path, &config.default_backend)?;
    ensure_valid(&workflow_path.display().to_string(), &validate_workflow(&workflow))?;

    let orchestrator = Orchestrator::from_config(config);
    let state = orchestrator
        .resume(&workflow, &workspace, &BTreeMap::new())
        .with_context(|| format!("resume workspace {id}"))?;
    print_summary(&summarize(&state));
    print_steps(&state);
    Ok(outcome_code(&state))
}

fn cmd_status(config: &PipelineConfig, id: &str, json: bool) -> Result<i32> {
    let workspace = get_workspace(&config.workspaces_dir, id)?;
    let state = state_store::load(&workspace)?
        .with_context(|| format!("no state found in workspace {id}"))?;
    let summary = summarize(&state);
    if json {
        let payload = serde_json::to_string_pretty(&summary).context("serialize summary")?;
        println!("{payload}");
    } else {
        print_summary(&summary);
        print_steps(&state);
    }
    Ok(exit_codes::OK)
}

fn cmd_list(config: &PipelineConfig) -> Result<i32> {
    let workspaces = list_workspaces(&config.workspaces_dir)?;
    if workspaces.is_empty() {
        println!("no workspaces in {}", config.workspaces_dir.display());
        return Ok(exit_codes::OK);
    }
    for workspace in workspaces {
        let line = match state_store::load(&workspace) {
            Ok(Some(state)) => format!(
                "{}  {:<12} {}",
                workspace.id,
                status_label(&summarize(&state)),
                state.workflow_name
            ),
            Ok(None) => format!("{}  {:<12}", workspace.id, "no state"),
            Err(err) => format!("{}  {:<12} {err}", workspace.id, "unreadable"),
        };
        println!("{line}");
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(config: &PipelineConfig, workflow_path: &Path) -> Result<i32> {
    let workflow = load_workflow(workflow_path, &config.default_backend)?;
    let problems = validate_workflow(&workflow);
    if !problems.is_empty() {
        eprintln!("{}: invalid workflow:\n- {}", workflow_path.display(), problems.join("\n- "));
        return Ok(exit_codes::INVALID);
    }
    println!(
        "workflow {} is valid ({} steps)",
        workflow.name,
        workflow.steps.len()
    );
    Ok(exit_codes::OK)
}

fn ensure_valid(label: &str, problems: &[String]) -> Result<()> {
    if !problems.is_empty() {
        bail!("{label}: invalid workflow:\n- {}", problems.join("\n- "));
    }
    Ok(())
}

fn outcome_code(state: &WorkflowState) -> i32 {
    if state.has_failures() {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    }
}

fn status_label(summary: &StateSummary) -> &'static str {
    match (summary.status, summary.has_failures) {
        (RunStatus::Completed, false) => "completed",
        (RunStatus::Completed, true) => "failed",
        (RunStatus::InProgress, _) => "in_progress",
    }
}

fn print_summary(summary: &StateSummary) {
    println!("workflow:  {} ({})", summary.workflow_name, summary.workflow_id);
    println!("status:    {}", status_label(summary));
    if let Some(step) = &summary.current_step {
        println!("current:   {step}");
    }
    println!("completed: {}", summary.completed_steps.join(", "));
    println!("pending:   {}", summary.pending_steps.join(", "));
    println!("tokens:    {}", summary.total_tokens);
    println!("duration:  {:.1}s", summary.duration_seconds);
}

fn print_steps(state: &WorkflowState) {
    for (id, result) in &state.steps {
        match &result.error {
            Some(error) => println!("  {id:<20} {:<12} {error}", result.status.as_str()),
            None => println!("  {id:<20} {}", result.status.as_str()),
        }
        for warning in &result.warnings {
            println!("  {:<20} warning: {warning}", "");
        }
    }
}
