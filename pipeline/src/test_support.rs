//! Test helpers: a scripted backend, workflow builders, and workspace fixtures.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::backend::{Backend, BackendOutcome, BackendRequest};
use crate::core::state::WorkflowState;
use crate::core::types::{ModelName, StepDefinition, WorkflowDefinition};
use crate::io::state_store;
use crate::io::workspace::{WorkspaceHandle, create_workspace};
use crate::orchestrator::Orchestrator;

/// Registry key used for [`ScriptedBackend`] in tests.
pub const SCRIPTED_BACKEND: &str = "scripted";

/// Tokens reported by a scripted success.
pub const SCRIPTED_TOKENS: u64 = 10;

/// One scripted reaction to a dispatch.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Write every declared output, then succeed.
    Succeed,
    /// Succeed without writing outputs.
    SucceedWithoutOutputs,
    /// Report a failure with this message.
    Fail(String),
    /// Return `Err` from the backend.
    Error(String),
    /// Panic inside the backend.
    Panic(String),
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<String, VecDeque<Scripted>>,
    dispatched: Vec<String>,
    snapshots: Vec<Option<WorkflowState>>,
}

/// Backend that pops queued reactions per step and records every dispatch.
///
/// Steps without queued reactions succeed. Clones share the same script, so
/// a test can keep one handle while the orchestrator owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reaction` for the next dispatch of `step_id`.
    pub fn push(&self, step_id: &str, reaction: Scripted) -> &Self {
        self.lock()
            .queued
            .entry(step_id.to_string())
            .or_default()
            .push_back(reaction);
        self
    }

    pub fn fail_next(&self, step_id: &str, error: &str) -> &Self {
        self.push(step_id, Scripted::Fail(error.to_string()))
    }

    /// Step ids in dispatch order.
    pub fn dispatched(&self) -> Vec<String> {
        self.lock().dispatched.clone()
    }

    /// The persisted state as it was at each dispatch.
    pub fn snapshots(&self) -> Vec<Option<WorkflowState>> {
        self.lock().snapshots.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Backend for ScriptedBackend {
    fn execute(&self, request: &BackendRequest<'_>) -> Result<BackendOutcome> {
        let step = request.step;
        let reaction = {
            let mut script = self.lock();
            script.dispatched.push(step.id.clone());
            let snapshot = state_store::load(request.workspace).ok().flatten();
            script.snapshots.push(snapshot);
            script
                .queued
                .get_mut(&step.id)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Scripted::Succeed)
        };

        match reaction {
            Scripted::Succeed => {
                for output in &step.outputs {
                    let path = request.workspace.resolve(output);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&path, format!("{} output\n", step.id))?;
                }
                Ok(BackendOutcome::succeeded(
                    Some(format!("{} done", step.id)),
                    SCRIPTED_TOKENS,
                ))
            }
            Scripted::SucceedWithoutOutputs => {
                Ok(BackendOutcome::succeeded(None, SCRIPTED_TOKENS))
            }
            Scripted::Fail(error) => Ok(BackendOutcome::failed(error, SCRIPTED_TOKENS)),
            Scripted::Error(error) => Err(anyhow!(error)),
            Scripted::Panic(message) => panic!("{message}"),
        }
    }
}

/// A step run by the scripted backend.
pub fn step(id: &str, depends_on: &[&str]) -> StepDefinition {
    let mut step = StepDefinition::new(id, ModelName::Haiku, format!("prompts/{id}.md"));
    step.backend = SCRIPTED_BACKEND.to_string();
    step.depends_on = depends_on.iter().map(|d| (*d).to_string()).collect();
    step
}

/// Like [`step`], declaring `outputs`.
pub fn step_with_outputs(id: &str, depends_on: &[&str], outputs: &[&str]) -> StepDefinition {
    let mut step = step(id, depends_on);
    step.outputs = outputs.iter().map(|o| (*o).to_string()).collect();
    step
}

pub fn workflow(name: &str, steps: Vec<StepDefinition>) -> WorkflowDefinition {
    WorkflowDefinition {
        name: name.to_string(),
        description: String::new(),
        steps,
    }
}

/// An orchestrator with `backend` registered as [`SCRIPTED_BACKEND`].
pub fn orchestrator_with(backend: &ScriptedBackend) -> Orchestrator {
    let mut orchestrator = Orchestrator::new();
    orchestrator.register_backend(SCRIPTED_BACKEND, backend.clone());
    orchestrator
}

/// A provisioned workspace inside a temporary directory.
pub struct TestWorkspace {
    pub temp: TempDir,
    pub handle: WorkspaceHandle,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let handle = create_workspace(&temp.path().join("workspaces"), None).expect("workspace");
        Self { temp, handle }
    }

    /// Write a file under the temp root (outside the workspace) and return its path.
    pub fn write_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.temp.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn load_state(&self) -> WorkflowState {
        state_store::load(&self.handle)
            .expect("load state")
            .expect("state present")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Empty template context.
pub fn no_context() -> BTreeMap<String, String> {
    BTreeMap::new()
}
