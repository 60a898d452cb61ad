//! Backend that runs a step through the `claude` CLI.

use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::backend::{Backend, BackendOutcome, BackendRequest};
use crate::io::config::ClaudeConfig;
use crate::io::process::{CommandRequest, run_command};
use crate::io::prompt::build_prompt;
use crate::io::step_log::{StepLog, write_step_log};

/// Bytes of stderr quoted in a failure message.
const STDERR_EXCERPT_BYTES: usize = 500;

static TOKENS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+tokens?").ok());

#[derive(Debug, Clone)]
pub struct ClaudeCodeBackend {
    config: ClaudeConfig,
}

impl ClaudeCodeBackend {
    pub fn new(config: &ClaudeConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Command line for one step, run from the workspace root.
    pub fn build_command(&self, request: &BackendRequest<'_>, prompt: &str) -> Command {
        let step = request.step;
        let mut cmd = Command::new(&self.config.program);
        cmd.arg("-p")
            .arg(prompt)
            .arg("--model")
            .arg(step.model.as_str())
            .arg("--max-turns")
            .arg(step.max_turns.to_string())
            .arg("--add-dir")
            .arg(&request.workspace.root)
            .arg("--no-session-persistence");
        for tool in &self.config.allowed_tools {
            cmd.arg("--allowedTools").arg(tool);
        }
        cmd.args(&self.config.extra_args)
            .current_dir(&request.workspace.root);
        cmd
    }
}

impl Backend for ClaudeCodeBackend {
    #[instrument(skip_all, fields(step_id = %request.step.id, model = request.step.model.as_str()))]
    fn execute(&self, request: &BackendRequest<'_>) -> Result<BackendOutcome> {
        let step = request.step;
        let prompt = build_prompt(
            Path::new(&step.prompt_source),
            request.workspace,
            request.context,
        )?;

        info!(workspace_id = %request.workspace.id, "starting claude");
        let cmd = self.build_command(request, &prompt);
        let output = run_command(
            cmd,
            &CommandRequest {
                timeout: request.timeout,
                output_limit_bytes: self.config.output_limit_bytes,
            },
        )
        .with_context(|| format!("run {}", self.config.program))?;

        let stdout = output.stdout_lossy();
        let stderr = output.stderr_lossy();
        let exit_code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        write_step_log(
            &request.log_path,
            &StepLog {
                header: vec![
                    ("step", step.id.clone()),
                    ("model", step.model.as_str().to_string()),
                    ("exit_code", exit_code.clone()),
                    ("timed_out", output.timed_out.to_string()),
                ],
                stdout: &stdout,
                stderr: &stderr,
                notice: output.truncated_notice("claude"),
            },
        )?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "claude timed out");
            return Ok(BackendOutcome::timed_out().with_output(stdout));
        }
        if !output.status.success() {
            warn!(exit_code = %exit_code, "claude failed");
            return Ok(BackendOutcome::failed(
                format!(
                    "Claude Code exited with code {exit_code}: {}",
                    excerpt(&stderr, STDERR_EXCERPT_BYTES)
                ),
                0,
            )
            .with_output(stdout));
        }

        let tokens = extract_token_usage(&stdout);
        debug!(tokens, "claude completed");
        Ok(BackendOutcome::succeeded(Some(stdout), tokens))
    }
}

/// First token count mentioned in the output (`1234 tokens`), or 0.
pub fn extract_token_usage(output: &str) -> u64 {
    TOKENS_RE
        .as_ref()
        .and_then(|re| re.captures(output))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// At most `max` bytes of `text`, cut on a char boundary.
fn excerpt(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
