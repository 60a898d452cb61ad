//! Workflow definitions and per-step results.
//!
//! Definitions are authored externally (YAML) and immutable once loaded.
//! Results are the mutable per-attempt records owned by the run state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend used when a step does not name one.
pub const DEFAULT_BACKEND: &str = "claude_code";
/// Default per-step timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Default backend turn budget.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// Model variant a backend should use for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelName {
    Haiku,
    Sonnet,
    Opus,
}

impl ModelName {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelName::Haiku => "haiku",
            ModelName::Sonnet => "sonnet",
            ModelName::Opus => "opus",
        }
    }
}

/// Lifecycle status of a step within one run attempt.
///
/// `Pending -> InProgress -> Completed | Failed`. Terminal statuses are never
/// left within the same attempt; a resumed attempt may overwrite `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

/// A single unit of work in a workflow.
///
/// Serialized field names follow the workflow file format (`wrapper`,
/// `prompt_strategy`, `timeout`); the Rust-side names are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub model: ModelName,
    /// Registry key of the backend that executes this step.
    #[serde(rename = "wrapper", alias = "backend", default = "default_backend")]
    pub backend: String,
    /// Prompt template reference, opaque to the orchestrator.
    #[serde(rename = "prompt_strategy", alias = "prompt_source")]
    pub prompt_source: String,
    /// Workspace-relative paths the step must produce.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(rename = "timeout", alias = "timeout_secs", default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

impl StepDefinition {
    /// Create a step with default backend, limits, and no outputs or dependencies.
    pub fn new(id: impl Into<String>, model: ModelName, prompt_source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model,
            backend: default_backend(),
            prompt_source: prompt_source.into(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}

/// A named, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.id.as_str())
    }
}

/// Outcome record for one step in one run attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Output path -> content fingerprint. Populated only on success.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub tokens_used: u64,
    pub error: Option<String>,
    /// Raw backend output kept for debugging.
    #[serde(default, alias = "agent_output")]
    pub raw_output: Option<String>,
    /// Non-fatal diagnostics (e.g. empty output files).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StepResult {
    pub fn pending(step_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::with_status(step_id, StepStatus::Pending, at)
    }

    pub fn in_progress(step_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::with_status(step_id, StepStatus::InProgress, at)
    }

    /// A failed result that ends at `completed_at` with the given error.
    pub fn failed(
        step_id: impl Into<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            completed_at: Some(completed_at),
            error: Some(error.into()),
            ..Self::with_status(step_id, StepStatus::Failed, started_at)
        }
    }

    fn with_status(step_id: impl Into<String>, status: StepStatus, at: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            started_at: at,
            completed_at: None,
            outputs: BTreeMap::new(),
            tokens_used: 0,
            error: None,
            raw_output: None,
            warnings: Vec::new(),
        }
    }

    /// Wall-clock duration, once the step has finished.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}
