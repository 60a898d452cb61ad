//! Step runner: executes one step through its backend.
//!
//! Every failure mode (unknown backend, backend error or panic, timeout,
//! missing outputs) ends up in a `Failed` [`StepResult`]. Nothing here returns
//! an error to the orchestrator.

use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::backend::{BackendOutcome, BackendRegistry, BackendRequest};
use crate::core::fingerprint::fingerprint;
use crate::core::types::{StepDefinition, StepResult, StepStatus};
use crate::io::step_log::step_log_path;
use crate::io::workspace::WorkspaceHandle;

/// Run `step` with the backend registered under `step.backend`.
#[instrument(skip_all, fields(step_id = %step.id, backend = %step.backend))]
pub fn execute_step(
    registry: &BackendRegistry,
    step: &StepDefinition,
    workspace: &WorkspaceHandle,
    context: &BTreeMap<String, String>,
) -> StepResult {
    let started_at = Utc::now();

    let Some(backend) = registry.get(&step.backend) else {
        warn!("unknown backend");
        return StepResult::failed(
            &step.id,
            started_at,
            Utc::now(),
            format!("Unknown backend: {}", step.backend),
        );
    };

    let timeout = Duration::from_secs(step.timeout_secs);
    let request = BackendRequest {
        step,
        workspace,
        context,
        timeout,
        log_path: step_log_path(workspace, &step.id),
    };

    info!(timeout_secs = step.timeout_secs, "dispatching step");
    let start = Instant::now();
    let dispatched = catch_unwind(AssertUnwindSafe(|| backend.execute(&request)));
    let elapsed = start.elapsed();

    let outcome = match dispatched {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            warn!(err = %format!("{err:#}"), "backend error");
            return StepResult::failed(
                &step.id,
                started_at,
                Utc::now(),
                format!("Execution error: {err:#}"),
            );
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(panic = %message, "backend panicked");
            return StepResult::failed(
                &step.id,
                started_at,
                Utc::now(),
                format!("Execution error: backend panicked: {message}"),
            );
        }
    };

    let mut result = finish(step, workspace, outcome, elapsed > timeout);
    result.started_at = started_at;
    result.completed_at = Some(Utc::now());
    info!(
        status = result.status.as_str(),
        tokens = result.tokens_used,
        elapsed_ms = elapsed.as_millis() as u64,
        "step finished"
    );
    result
}

/// Turn a backend outcome into a result, checking timeout and declared outputs.
fn finish(
    step: &StepDefinition,
    workspace: &WorkspaceHandle,
    outcome: BackendOutcome,
    overran: bool,
) -> StepResult {
    let mut result = StepResult::in_progress(&step.id, Utc::now());
    result.tokens_used = outcome.tokens_used;
    result.raw_output = outcome.output_text;

    if outcome.timed_out || overran {
        warn!(timeout_secs = step.timeout_secs, "step timed out");
        return fail(
            result,
            format!("Execution timed out after {} seconds", step.timeout_secs),
        );
    }
    if !outcome.success {
        let error = outcome
            .error
            .unwrap_or_else(|| "Backend reported failure".to_string());
        return fail(result, error);
    }

    let missing: Vec<&String> = step
        .outputs
        .iter()
        .filter(|output| !workspace.resolve(output).exists())
        .collect();
    if !missing.is_empty() {
        warn!(missing = ?missing, "expected outputs missing");
        return fail(
            result,
            format!("Expected outputs not created: {missing:?}"),
        );
    }

    for output in &step.outputs {
        let path = workspace.resolve(output);
        if !path.is_file() {
            continue;
        }
        match fs::read(&path) {
            Ok(content) => {
                if content.is_empty() {
                    warn!(path = %output, "output file is empty");
                    result.warnings.push(format!("output file is empty: {output}"));
                }
                result.outputs.insert(output.clone(), fingerprint(&content));
            }
            Err(err) => {
                return fail(
                    result,
                    format!("Execution error: read output {}: {err}", path.display()),
                );
            }
        }
    }

    result.status = StepStatus::Completed;
    result
}

fn fail(mut result: StepResult, error: String) -> StepResult {
    result.status = StepStatus::Failed;
    result.outputs.clear();
    result.error = Some(error);
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::core::types::ModelName;
    use crate::io::workspace::create_workspace;
    use anyhow::{Result, anyhow};
    use std::thread;

    /// Writes the given files, then returns a fixed outcome.
    struct FakeBackend {
        files: Vec<(&'static str, &'static str)>,
        outcome: BackendOutcome,
    }

    impl FakeBackend {
        fn new(files: Vec<(&'static str, &'static str)>, outcome: BackendOutcome) -> Self {
            Self { files, outcome }
        }
    }

    impl Backend for FakeBackend {
        fn execute(&self, request: &BackendRequest<'_>) -> Result<BackendOutcome> {
            for (path, content) in &self.files {
                let full = request.workspace.resolve(path);
                fs::create_dir_all(full.parent().expect("parent"))?;
                fs::write(full, content)?;
            }
            Ok(self.outcome.clone())
        }
    }

    struct ErrorBackend;

    impl Backend for ErrorBackend {
        fn execute(&self, _request: &BackendRequest<'_>) -> Result<BackendOutcome> {
            Err(anyhow!("connection reset").context("call agent"))
        }
    }

    struct PanicBackend;

    impl Backend for PanicBackend {
        fn execute(&self, _request: &BackendRequest<'_>) -> Result<BackendOutcome> {
            panic!("backend exploded");
        }
    }

    struct SleepyBackend(Duration);

    impl Backend for SleepyBackend {
        fn execute(&self, _request: &BackendRequest<'_>) -> Result<BackendOutcome> {
            thread::sleep(self.0);
            Ok(BackendOutcome::succeeded(None, 7))
        }
    }

    fn step(outputs: &[&str]) -> StepDefinition {
        let mut step = StepDefinition::new("build", ModelName::Sonnet, "prompts/build.md");
        step.backend = "fake".to_string();
        step.outputs = outputs.iter().map(|o| (*o).to_string()).collect();
        step
    }

    fn run(
        backend: impl Backend + 'static,
        step: &StepDefinition,
    ) -> (tempfile::TempDir, StepResult) {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = create_workspace(temp.path(), None).expect("workspace");
        let mut registry = BackendRegistry::empty();
        registry.register("fake", backend);
        let result = execute_step(&registry, step, &workspace, &BTreeMap::new());
        (temp, result)
    }

    #[test]
    fn success_fingerprints_every_output() {
        let backend = FakeBackend::new(
            vec![("project/main.py", "print(1)"), ("context/plan.md", "plan")],
            BackendOutcome::succeeded(Some("ok".to_string()), 42),
        );
        let step = step(&["project/main.py", "context/plan.md"]);

        let (_temp, result) = run(backend, &step);

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.tokens_used, 42);
        assert_eq!(result.raw_output.as_deref(), Some("ok"));
        assert_eq!(result.outputs.len(), 2);
        assert_eq!(result.outputs["context/plan.md"], fingerprint(b"plan"));
        assert!(result.completed_at.is_some());
        assert!(result.error.is_none());
    }

    #[test]
    fn unknown_backend_fails_without_dispatch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = create_workspace(temp.path(), None).expect("workspace");
        let mut registry = BackendRegistry::empty();
        registry.register(
            "fake",
            FakeBackend::new(vec![("project/marker", "x")], BackendOutcome::default()),
        );
        let mut step = step(&[]);
        step.backend = "nope".to_string();

        let result = execute_step(&registry, &step, &workspace, &BTreeMap::new());

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("Unknown backend: nope"));
        assert!(!workspace.resolve("project/marker").exists());
        assert!(!step_log_path(&workspace, "build").exists());
    }

    #[test]
    fn missing_outputs_fail_even_when_backend_succeeds() {
        let backend = FakeBackend::new(
            vec![("project/a.py", "a")],
            BackendOutcome::succeeded(None, 5),
        );
        let step = step(&["project/a.py", "project/b.py", "project/c.py"]);

        let (_temp, result) = run(backend, &step);

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some(r#"Expected outputs not created: ["project/b.py", "project/c.py"]"#)
        );
        assert!(result.outputs.is_empty());
        assert_eq!(result.tokens_used, 5);
    }

    #[test]
    fn empty_output_is_a_warning_not_a_failure() {
        let backend = FakeBackend::new(
            vec![("context/notes.md", "")],
            BackendOutcome::succeeded(None, 1),
        );
        let step = step(&["context/notes.md"]);

        let (_temp, result) = run(backend, &step);

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.warnings, vec!["output file is empty: context/notes.md"]);
        assert!(result.outputs.contains_key("context/notes.md"));
    }

    #[test]
    fn backend_failure_keeps_message_and_tokens() {
        let backend = FakeBackend::new(Vec::new(), BackendOutcome::failed("agent gave up", 9));
        let (_temp, result) = run(backend, &step(&[]));

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("agent gave up"));
        assert_eq!(result.tokens_used, 9);
    }

    #[test]
    fn reported_timeout_becomes_timeout_error() {
        let backend = FakeBackend::new(Vec::new(), BackendOutcome::timed_out());
        let mut step = step(&[]);
        step.timeout_secs = 30;

        let (_temp, result) = run(backend, &step);

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Execution timed out after 30 seconds")
        );
    }

    #[test]
    fn overrunning_the_deadline_is_a_timeout() {
        let mut step = step(&[]);
        step.timeout_secs = 1;

        let (_temp, result) = run(SleepyBackend(Duration::from_millis(1_100)), &step);

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Execution timed out after 1 seconds")
        );
    }

    #[test]
    fn backend_error_is_captured() {
        let (_temp, result) = run(ErrorBackend, &step(&[]));

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Execution error: call agent: connection reset")
        );
    }

    #[test]
    fn backend_panic_is_captured() {
        let (_temp, result) = run(PanicBackend, &step(&[]));

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Execution error: backend panicked: backend exploded")
        );
    }
}
