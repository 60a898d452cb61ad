//! Execution backends.
//!
//! The [`Backend`] trait decouples the step runner from whatever actually
//! performs a step's work. Backends are selected per step by string key
//! through a [`BackendRegistry`] owned by each orchestrator; tests register
//! scripted backends that return predetermined outcomes without spawning
//! processes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::core::types::StepDefinition;
use crate::io::config::PipelineConfig;
use crate::io::workspace::WorkspaceHandle;

pub mod claude_code;
pub mod mock;

pub use claude_code::ClaudeCodeBackend;
pub use mock::MockBackend;

/// Registry key of the deterministic mock backend.
pub const MOCK_BACKEND: &str = "mock";
/// Registry key of the external-process backend.
pub const CLAUDE_CODE_BACKEND: &str = "claude_code";

/// Everything a backend needs to run one step.
#[derive(Debug, Clone)]
pub struct BackendRequest<'a> {
    pub step: &'a StepDefinition,
    pub workspace: &'a WorkspaceHandle,
    /// Template variables for the step prompt.
    pub context: &'a BTreeMap<String, String>,
    /// Hard limit on the step; backends must stop work once it elapses.
    pub timeout: Duration,
    /// Where to write the step's diagnostic log.
    pub log_path: PathBuf,
}

/// What a backend reports back for one step.
///
/// Declared outputs are not checked by the backend; the step runner verifies
/// them afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOutcome {
    pub success: bool,
    pub output_text: Option<String>,
    pub tokens_used: u64,
    pub error: Option<String>,
    /// Set when the backend stopped the work because the timeout elapsed.
    pub timed_out: bool,
}

impl BackendOutcome {
    pub fn succeeded(output_text: Option<String>, tokens_used: u64) -> Self {
        Self {
            success: true,
            output_text,
            tokens_used,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            success: false,
            tokens_used,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            success: false,
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn with_output(mut self, output_text: impl Into<String>) -> Self {
        self.output_text = Some(output_text.into());
        self
    }
}

/// Abstraction over step execution backends.
pub trait Backend {
    /// Perform the step's work.
    ///
    /// `Err` is reserved for unexpected failures (I/O, spawn errors); an
    /// expected unsuccessful run is an `Ok` outcome with `success == false`.
    fn execute(&self, request: &BackendRequest<'_>) -> Result<BackendOutcome>;
}

/// Backends by key.
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn Backend>>,
}

impl BackendRegistry {
    /// A registry without any backends.
    pub fn empty() -> Self {
        Self {
            backends: BTreeMap::new(),
        }
    }

    /// A registry holding the mock and external-process backends.
    pub fn with_defaults(config: &PipelineConfig) -> Self {
        let mut registry = Self::empty();
        registry.register(MOCK_BACKEND, MockBackend::new(&config.mock));
        registry.register(CLAUDE_CODE_BACKEND, ClaudeCodeBackend::new(&config.claude));
        registry
    }

    /// Register `backend` under `key`, returning any backend it replaces.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        backend: impl Backend + 'static,
    ) -> Option<Box<dyn Backend>> {
        self.backends.insert(key.into(), Box::new(backend))
    }

    pub fn get(&self, key: &str) -> Option<&dyn Backend> {
        self.backends.get(key).map(|backend| backend.as_ref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.backends.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults(&PipelineConfig::default())
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}
