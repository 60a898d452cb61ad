//! Workflow orchestrator: drives a workflow through the step runner.
//!
//! The orchestrator owns the run's [`WorkflowState`] and persists it after
//! every transition:
//!
//! 1. every step recorded `Pending` at run start,
//! 2. `InProgress` (and `current_step`) right before dispatch,
//! 3. the step's terminal result right after it returns,
//! 4. `completed_at` once the loop ends.
//!
//! The loop stops after the first failed step. A later [`Orchestrator::resume`]
//! skips completed steps and re-dispatches everything else, including a step
//! left `InProgress` by an interrupted process.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::backend::{Backend, BackendRegistry};
use crate::core::graph::resolve_order;
use crate::core::state::WorkflowState;
use crate::core::types::{StepResult, StepStatus, WorkflowDefinition};
use crate::error::OrchestratorError;
use crate::io::config::PipelineConfig;
use crate::io::state_store;
use crate::io::workspace::{PROBLEM_FILE_NAME, WorkspaceHandle, copy_file_to_context};
use crate::step::execute_step;

/// Error recorded for a step whose dependencies are not all completed.
pub const DEPENDENCY_GATE_ERROR: &str = "Dependencies failed or incomplete";

/// Context variable holding the problem file's stem.
pub const PROBLEM_NAME_VAR: &str = "problem_name";

#[derive(Debug, Default)]
pub struct Orchestrator {
    registry: BackendRegistry,
}

impl Orchestrator {
    /// An orchestrator with the default backends and default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::with_registry(BackendRegistry::with_defaults(config))
    }

    pub fn with_registry(registry: BackendRegistry) -> Self {
        Self { registry }
    }

    /// Make `backend` available to steps whose backend key is `key`.
    pub fn register_backend(&mut self, key: impl Into<String>, backend: impl Backend + 'static) {
        let key = key.into();
        if self.registry.register(key.clone(), backend).is_some() {
            debug!(key = %key, "backend replaced");
        }
    }

    /// Run `workflow` from scratch in `workspace`.
    ///
    /// A dependency cycle is reported before anything is written. The problem
    /// file, if any, is copied to `context/problem.txt` and its stem exposed
    /// to prompts as `problem_name` unless the caller set it.
    #[instrument(skip_all, fields(workflow = %workflow.name, workspace_id = %workspace.id))]
    pub fn run(
        &self,
        workflow: &WorkflowDefinition,
        workspace: &WorkspaceHandle,
        problem_file: Option<&Path>,
        context: &BTreeMap<String, String>,
    ) -> Result<WorkflowState, OrchestratorError> {
        let order = resolve_order(workflow)?;

        let started_at = Utc::now();
        let mut state = WorkflowState::new(
            &workspace.id,
            &workflow.name,
            workspace.root.display().to_string(),
            problem_file.map(|p| p.display().to_string()),
            started_at,
        );

        if let Some(path) = problem_file {
            copy_file_to_context(path, workspace, Some(PROBLEM_FILE_NAME)).map_err(|err| {
                OrchestratorError::ProblemFile {
                    path: path.to_path_buf(),
                    message: format!("{err:#}"),
                }
            })?;
        }

        for step in &workflow.steps {
            state.record(StepResult::pending(&step.id, started_at));
        }
        state_store::save(&state, workspace)?;

        info!(steps = order.len(), "workflow started");
        let context = with_problem_name(context, state.problem_file.as_deref());
        self.execute(workflow, &order, workspace, &mut state, &context)?;
        Ok(state)
    }

    /// Continue a previous run in `workspace`.
    ///
    /// Completed steps are skipped; failed, pending, and interrupted steps run
    /// again. `workflow` may have been edited since: steps new to it start
    /// `Pending`.
    #[instrument(skip_all, fields(workflow = %workflow.name, workspace_id = %workspace.id))]
    pub fn resume(
        &self,
        workflow: &WorkflowDefinition,
        workspace: &WorkspaceHandle,
        context: &BTreeMap<String, String>,
    ) -> Result<WorkflowState, OrchestratorError> {
        let Some(mut state) = state_store::load(workspace)? else {
            return Err(OrchestratorError::NoState {
                workspace_id: workspace.id.clone(),
            });
        };
        if state.is_complete() && !state.has_failures() {
            return Err(OrchestratorError::AlreadyComplete {
                workflow_id: state.workflow_id,
            });
        }
        let order = resolve_order(workflow)?;

        if state.workflow_name != workflow.name {
            warn!(
                recorded = %state.workflow_name,
                "resuming with a differently named workflow"
            );
        }
        state.completed_at = None;
        let now = Utc::now();
        let interrupted: Vec<String> = state.in_progress_steps();
        for step_id in interrupted {
            info!(step_id = %step_id, "re-queueing interrupted step");
            state.record(StepResult::pending(step_id, now));
        }
        state.current_step = None;
        for step in &workflow.steps {
            if state.step_result(&step.id).is_none() {
                debug!(step_id = %step.id, "step added since last attempt");
                state.record(StepResult::pending(&step.id, now));
            }
        }
        state_store::save(&state, workspace)?;

        info!(
            completed = state.completed_steps().len(),
            steps = order.len(),
            "workflow resumed"
        );
        let context = with_problem_name(context, state.problem_file.as_deref());
        self.execute(workflow, &order, workspace, &mut state, &context)?;
        Ok(state)
    }

    fn execute(
        &self,
        workflow: &WorkflowDefinition,
        order: &[String],
        workspace: &WorkspaceHandle,
        state: &mut WorkflowState,
        context: &BTreeMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        for step_id in order {
            let Some(step) = workflow.step(step_id) else {
                continue;
            };
            if state.step_status(step_id) == Some(StepStatus::Completed) {
                debug!(step_id = %step_id, "step already completed, skipping");
                continue;
            }

            let unmet = state.unsatisfied_dependencies(step);
            if !unmet.is_empty() {
                warn!(step_id = %step_id, unmet = ?unmet, "dependencies not satisfied");
                let now = Utc::now();
                state.record(StepResult::failed(step_id, now, now, DEPENDENCY_GATE_ERROR));
                state_store::save(state, workspace)?;
                continue;
            }

            state.record(StepResult::in_progress(step_id, Utc::now()));
            state_store::save(state, workspace)?;

            let result = execute_step(&self.registry, step, workspace, context);
            let failed = result.status == StepStatus::Failed;
            if failed {
                warn!(
                    step_id = %step_id,
                    error = result.error.as_deref().unwrap_or_default(),
                    "step failed"
                );
            }
            state.record(result);
            state_store::save(state, workspace)?;

            if failed {
                info!(step_id = %step_id, "stopping after failed step");
                break;
            }
        }

        state.completed_at = Some(Utc::now());
        state_store::save(state, workspace)?;
        info!(
            has_failures = state.has_failures(),
            total_tokens = state.total_tokens,
            "workflow finished"
        );
        Ok(())
    }
}

/// `context` plus `problem_name` from the problem file stem, unless already set.
fn with_problem_name(
    context: &BTreeMap<String, String>,
    problem_file: Option<&str>,
) -> BTreeMap<String, String> {
    let mut context = context.clone();
    if let Some(stem) = problem_file
        .and_then(|p| Path::new(p).file_stem())
        .map(|s| s.to_string_lossy().into_owned())
    {
        context.entry(PROBLEM_NAME_VAR.to_string()).or_insert(stem);
    }
    context
}
