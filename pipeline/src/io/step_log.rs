//! Per-step backend logs under the workspace `logs/` area.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::io::workspace::WorkspaceHandle;

/// Path of the log written for `step_id`, always directly inside `logs/`.
pub fn step_log_path(workspace: &WorkspaceHandle, step_id: &str) -> PathBuf {
    let name: String = step_id
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    workspace.logs_dir.join(format!("{name}.log"))
}

/// Contents of one step log.
#[derive(Debug, Clone, Default)]
pub struct StepLog<'a> {
    pub header: Vec<(&'a str, String)>,
    pub stdout: &'a str,
    pub stderr: &'a str,
    /// Truncation notice appended after the streams, may be empty.
    pub notice: String,
}

/// Write a step log, replacing any previous attempt's log.
pub fn write_step_log(path: &Path, log: &StepLog<'_>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut buf = String::new();
    for (key, value) in &log.header {
        buf.push_str(&format!("{key}: {value}\n"));
    }
    buf.push_str("\n=== stdout ===\n");
    buf.push_str(log.stdout);
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(log.stderr);
    buf.push_str(&log.notice);
    fs::write(path, buf).with_context(|| format!("write step log {}", path.display()))
}
