//! Deterministic backend for dry runs and tests.
//!
//! The rendered prompt controls the outcome:
//! - `MOCK_FAIL` fails the step,
//! - `MOCK_SLOW` delays it by the configured amount,
//! - otherwise every declared output is written with placeholder content.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::backend::{Backend, BackendOutcome, BackendRequest};
use crate::core::types::StepDefinition;
use crate::io::config::MockConfig;
use crate::io::prompt::build_prompt;

pub const FAIL_DIRECTIVE: &str = "MOCK_FAIL";
pub const SLOW_DIRECTIVE: &str = "MOCK_SLOW";

const FAIL_TOKENS: u64 = 100;
const SUCCESS_TOKENS: u64 = 250;

#[derive(Debug, Clone)]
pub struct MockBackend {
    slow_delay: Duration,
}

impl MockBackend {
    pub fn new(config: &MockConfig) -> Self {
        Self {
            slow_delay: Duration::from_millis(config.slow_delay_ms),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(&MockConfig::default())
    }
}

impl Backend for MockBackend {
    #[instrument(skip_all, fields(step_id = %request.step.id))]
    fn execute(&self, request: &BackendRequest<'_>) -> Result<BackendOutcome> {
        let step = request.step;
        let prompt = build_prompt(
            Path::new(&step.prompt_source),
            request.workspace,
            request.context,
        )?;

        if prompt.contains(SLOW_DIRECTIVE) {
            debug!(delay_ms = self.slow_delay.as_millis() as u64, "mock delay");
            if self.slow_delay >= request.timeout {
                thread::sleep(request.timeout);
                return Ok(BackendOutcome::timed_out());
            }
            thread::sleep(self.slow_delay);
        }

        if prompt.contains(FAIL_DIRECTIVE) {
            info!("mock failure directive");
            return Ok(BackendOutcome::failed(
                "Mock failure triggered by MOCK_FAIL directive",
                FAIL_TOKENS,
            ));
        }

        let started = Instant::now();
        let problem_name = request
            .context
            .get("problem_name")
            .map_or("unknown", String::as_str);
        for output in &step.outputs {
            let path = request.workspace.resolve(output);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
            let content = mock_content(step, output, problem_name);
            fs::write(&path, &content).with_context(|| format!("write {}", path.display()))?;
            debug!(path = %output, size = content.len(), "mock output written");
        }

        info!(
            outputs = step.outputs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "mock step completed"
        );
        Ok(BackendOutcome::succeeded(
            Some(format!("mock step {} completed", step.id)),
            SUCCESS_TOKENS,
        ))
    }
}

/// Placeholder content chosen by the output's file extension.
fn mock_content(step: &StepDefinition, output: &str, problem_name: &str) -> String {
    let id = &step.id;
    if output.ends_with(".md") {
        format!(
            "# Mock Output: {id}\n\n\
             This is a mock output file generated for testing.\n\n\
             **Problem**: {problem_name}\n\
             **Step**: {id}\n\
             **Model**: {model}\n",
            model = step.model.as_str()
        )
    } else if output.ends_with(".py") {
        if id.to_lowercase().contains("test") {
            format!(
                "\"\"\"Mock tests for {problem_name}\"\"\"\n\n\
                 def test_{problem_name}():\n    assert True\n"
            )
        } else {
            format!(
                "\"\"\"Mock solution for {problem_name}\"\"\"\n\n\
                 def solution(input_data):\n    \"\"\"Generated by step: {id}\"\"\"\n    return input_data\n"
            )
        }
    } else {
        format!("Mock output for step: {id}\nProblem: {problem_name}\n")
    }
}
