//! Run state: the single ledger for one run attempt.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{StepDefinition, StepResult, StepStatus};

/// Persisted progress of a workflow run (`state/workflow_state.json`).
///
/// Step results are keyed by step id in lexicographic order to keep the
/// serialized snapshot stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Run identifier (the workspace id).
    pub workflow_id: String,
    pub workflow_name: String,
    pub workspace_path: String,
    pub problem_file: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Set when the run finished; the run is complete iff this is set.
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepResult>,
    /// The one step currently in progress, if any.
    pub current_step: Option<String>,
    #[serde(default)]
    pub total_tokens: u64,
}

impl WorkflowState {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        workspace_path: impl Into<String>,
        problem_file: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            workspace_path: workspace_path.into(),
            problem_file,
            started_at,
            completed_at: None,
            steps: BTreeMap::new(),
            current_step: None,
            total_tokens: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn has_failures(&self) -> bool {
        self.steps
            .values()
            .any(|result| result.status == StepStatus::Failed)
    }

    pub fn completed_steps(&self) -> Vec<String> {
        self.ids_with_status(StepStatus::Completed)
    }

    pub fn pending_steps(&self) -> Vec<String> {
        self.ids_with_status(StepStatus::Pending)
    }

    pub fn in_progress_steps(&self) -> Vec<String> {
        self.ids_with_status(StepStatus::InProgress)
    }

    fn ids_with_status(&self, status: StepStatus) -> Vec<String> {
        self.steps
            .iter()
            .filter(|(_, result)| result.status == status)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn step_result(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.get(step_id)
    }

    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.steps.get(step_id).map(|result| result.status)
    }

    /// Record (insert or overwrite) a step result.
    ///
    /// An `InProgress` result becomes the current step; a terminal result for
    /// the current step clears it. `total_tokens` is recomputed from the
    /// recorded results, so a retried step replaces its earlier token count.
    pub fn record(&mut self, result: StepResult) {
        match result.status {
            StepStatus::InProgress => self.current_step = Some(result.step_id.clone()),
            status if status.is_terminal() || status == StepStatus::Skipped => {
                if self.current_step.as_deref() == Some(result.step_id.as_str()) {
                    self.current_step = None;
                }
            }
            _ => {}
        }
        self.steps.insert(result.step_id.clone(), result);
        self.total_tokens = self.steps.values().map(|r| r.tokens_used).sum();
    }

    /// Dependencies of `step` that do not have a `Completed` result.
    ///
    /// A step may run iff this is empty. Missing results count as unsatisfied.
    pub fn unsatisfied_dependencies(&self, step: &StepDefinition) -> Vec<String> {
        step.depends_on
            .iter()
            .filter(|dep| self.step_status(dep) != Some(StepStatus::Completed))
            .cloned()
            .collect()
    }
}

/// Coarse run status for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
}

/// Human-facing summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub has_failures: bool,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub pending_steps: Vec<String>,
    pub total_tokens: u64,
    /// Seconds until completion, or until `now` for an unfinished run.
    pub duration_seconds: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Summarize a run, measuring unfinished runs against `now`.
pub fn summarize_at(state: &WorkflowState, now: DateTime<Utc>) -> StateSummary {
    let end = state.completed_at.unwrap_or(now);
    StateSummary {
        workflow_id: state.workflow_id.clone(),
        workflow_name: state.workflow_name.clone(),
        status: if state.is_complete() {
            RunStatus::Completed
        } else {
            RunStatus::InProgress
        },
        has_failures: state.has_failures(),
        current_step: state.current_step.clone(),
        completed_steps: state.completed_steps(),
        pending_steps: state.pending_steps(),
        total_tokens: state.total_tokens,
        duration_seconds: (end - state.started_at).num_milliseconds() as f64 / 1000.0,
        started_at: state.started_at,
        completed_at: state.completed_at,
    }
}

pub fn summarize(state: &WorkflowState) -> StateSummary {
    summarize_at(state, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ModelName;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, secs).unwrap()
    }

    fn state() -> WorkflowState {
        WorkflowState::new("00001", "demo", "/tmp/ws", None, at(0))
    }

    fn completed(id: &str, tokens: u64) -> StepResult {
        StepResult {
            status: StepStatus::Completed,
            completed_at: Some(at(1)),
            tokens_used: tokens,
            ..StepResult::in_progress(id, at(0))
        }
    }

    #[test]
    fn record_tracks_current_step() {
        let mut state = state();
        state.record(StepResult::in_progress("a", at(0)));
        assert_eq!(state.current_step.as_deref(), Some("a"));

        state.record(completed("a", 10));
        assert_eq!(state.current_step, None);
        assert_eq!(state.completed_steps(), vec!["a".to_string()]);
    }

    #[test]
    fn record_leaves_other_current_step_untouched() {
        let mut state = state();
        state.record(StepResult::in_progress("b", at(0)));
        state.record(StepResult::failed("a", at(0), at(1), "boom"));
        assert_eq!(state.current_step.as_deref(), Some("b"));
    }

    #[test]
    fn retried_step_replaces_previous_tokens() {
        let mut state = state();
        state.record(completed("a", 250));
        let mut failed = StepResult::failed("b", at(0), at(1), "boom");
        failed.tokens_used = 100;
        state.record(failed);
        assert_eq!(state.total_tokens, 350);

        state.record(completed("b", 250));
        assert_eq!(state.total_tokens, 500);
        assert!(!state.has_failures());
    }

    #[test]
    fn unsatisfied_dependencies_counts_missing_and_incomplete() {
        let mut state = state();
        state.record(completed("a", 0));
        state.record(StepResult::failed("b", at(0), at(1), "boom"));

        let mut step = StepDefinition::new("c", ModelName::Haiku, "p.md");
        step.depends_on = vec!["a".to_string(), "b".to_string(), "missing".to_string()];

        assert_eq!(
            state.unsatisfied_dependencies(&step),
            vec!["b".to_string(), "missing".to_string()]
        );
    }

    #[test]
    fn summary_reports_duration_to_completion() {
        let mut state = state();
        state.record(completed("a", 7));
        state.record(StepResult::pending("b", at(0)));
        state.completed_at = Some(at(30));

        let summary = summarize_at(&state, at(59));
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.duration_seconds, 30.0);
        assert_eq!(summary.completed_steps, vec!["a".to_string()]);
        assert_eq!(summary.pending_steps, vec!["b".to_string()]);
        assert_eq!(summary.total_tokens, 7);
    }

    #[test]
    fn summary_of_running_state_measures_to_now() {
        let summary = summarize_at(&state(), at(12));
        assert_eq!(summary.status, RunStatus::InProgress);
        assert_eq!(summary.duration_seconds, 12.0);
        assert!(!summary.has_failures);
    }
}
