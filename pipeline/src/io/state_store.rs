//! Durable run state snapshots (`state/workflow_state.json`).
//!
//! Saves serialize the whole state in memory, write a sibling temp file, and
//! rename it over the canonical snapshot. A load therefore observes either the
//! previous snapshot or the new one, never a torn write. The temp file and
//! timestamped backups are never read by [`load`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::core::state::WorkflowState;
use crate::error::StateError;
use crate::io::workspace::WorkspaceHandle;

pub const STATE_FILE_NAME: &str = "workflow_state.json";
const TEMP_FILE_NAME: &str = "workflow_state.json.tmp";

pub fn state_path(workspace: &WorkspaceHandle) -> PathBuf {
    workspace.state_dir.join(STATE_FILE_NAME)
}

pub fn temp_path(workspace: &WorkspaceHandle) -> PathBuf {
    workspace.state_dir.join(TEMP_FILE_NAME)
}

/// Atomically persist `state` into the workspace state area.
pub fn save(state: &WorkflowState, workspace: &WorkspaceHandle) -> Result<(), StateError> {
    let mut buf = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;
    buf.push('\n');
    write_atomic(&state_path(workspace), &temp_path(workspace), &buf)?;
    debug!(
        workspace_id = %workspace.id,
        current_step = ?state.current_step,
        completed_steps = state.completed_steps().len(),
        "state saved"
    );
    Ok(())
}

fn write_atomic(path: &Path, tmp_path: &Path, contents: &str) -> Result<(), StateError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| StateError::Write { path, source }
    };
    fs::write(tmp_path, contents).map_err(write_err(tmp_path))?;
    fs::rename(tmp_path, path).map_err(write_err(path))?;
    Ok(())
}

/// Load the canonical snapshot.
///
/// Returns `Ok(None)` when no snapshot exists and [`StateError::Corrupt`] when
/// one exists but does not parse.
pub fn load(workspace: &WorkspaceHandle) -> Result<Option<WorkflowState>, StateError> {
    let path = state_path(workspace);
    if !path.exists() {
        debug!(workspace_id = %workspace.id, "no state found");
        return Ok(None);
    }
    let contents = fs::read_to_string(&path).map_err(|source| StateError::Read {
        path: path.clone(),
        source,
    })?;
    let state: WorkflowState =
        serde_json::from_str(&contents).map_err(|source| StateError::Corrupt { path, source })?;
    debug!(
        workspace_id = %workspace.id,
        current_step = ?state.current_step,
        completed_steps = state.completed_steps().len(),
        "state loaded"
    );
    Ok(Some(state))
}

/// True iff a snapshot exists and the run is unfinished or finished with
/// failures. Unreadable snapshots are reported as not resumable.
pub fn can_resume(workspace: &WorkspaceHandle) -> bool {
    match load(workspace) {
        Ok(Some(state)) => !state.is_complete() || state.has_failures(),
        Ok(None) => false,
        Err(err) => {
            warn!(workspace_id = %workspace.id, err = %err, "state check failed");
            false
        }
    }
}

/// Copy the canonical snapshot to a timestamped sibling for diagnostics.
pub fn create_backup(workspace: &WorkspaceHandle) -> Result<PathBuf, StateError> {
    let path = state_path(workspace);
    if !path.exists() {
        return Err(StateError::MissingSnapshot(workspace.state_dir.clone()));
    }
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let mut backup = workspace
        .state_dir
        .join(format!("workflow_state_{timestamp}.json.bak"));
    let mut suffix = 1;
    while backup.exists() {
        backup = workspace
            .state_dir
            .join(format!("workflow_state_{timestamp}_{suffix}.json.bak"));
        suffix += 1;
    }
    fs::copy(&path, &backup).map_err(|source| StateError::Write {
        path: backup.clone(),
        source,
    })?;
    info!(workspace_id = %workspace.id, backup = %backup.display(), "state backup created");
    Ok(backup)
}
