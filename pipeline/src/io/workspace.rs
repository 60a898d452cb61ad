//! Workspace handles and provisioning.
//!
//! Each run gets a numbered directory under the workspaces base:
//!
//! ```text
//! workspaces/
//!   00001/
//!     project/   working directory for produced code
//!     context/   problem description and other inputs
//!     state/     workflow state snapshots
//!     logs/      per-step backend logs
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Fixed name of the problem file copied into `context/`.
pub const PROBLEM_FILE_NAME: &str = "problem.txt";

/// Resolved directories of one workspace.
///
/// The orchestrator only resolves paths through this handle; it never creates
/// or deletes the workspace itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceHandle {
    pub id: String,
    pub root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub project_dir: PathBuf,
    pub context_dir: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl WorkspaceHandle {
    /// Build a handle for an existing workspace directory.
    pub fn from_path(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta =
            fs::metadata(&root).with_context(|| format!("stat workspace {}", root.display()))?;
        let created = meta.created().or_else(|_| meta.modified()).ok();
        let id = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("workspace path has no name {}", root.display()))?;
        Ok(Self {
            id,
            created_at: created.map(DateTime::<Utc>::from).unwrap_or_else(Utc::now),
            project_dir: root.join("project"),
            context_dir: root.join("context"),
            state_dir: root.join("state"),
            logs_dir: root.join("logs"),
            root,
        })
    }

    /// Resolve a workspace-relative path.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// Next free build number under `base_dir` (1 when none exist).
pub fn next_build_number(base_dir: &Path) -> Result<u32> {
    if !base_dir.exists() {
        return Ok(1);
    }
    let mut highest = 0;
    for entry in
        fs::read_dir(base_dir).with_context(|| format!("read directory {}", base_dir.display()))?
    {
        let entry = entry.with_context(|| format!("read entry in {}", base_dir.display()))?;
        if let Some(number) = build_number_of(&entry.path()) {
            highest = highest.max(number);
        }
    }
    Ok(highest + 1)
}

fn build_number_of(path: &Path) -> Option<u32> {
    if !path.is_dir() {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

pub fn workspace_id(build_number: u32) -> String {
    format!("{build_number:05}")
}

/// Create a new workspace with its four sub-directories.
///
/// Uses the next free build number unless one is given. Fails if the target
/// directory already exists.
pub fn create_workspace(base_dir: &Path, build_number: Option<u32>) -> Result<WorkspaceHandle> {
    let number = match build_number {
        Some(number) => number,
        None => next_build_number(base_dir)?,
    };
    let root = base_dir.join(workspace_id(number));
    if root.exists() {
        bail!("workspace {} already exists", workspace_id(number));
    }

    for dir in ["project", "context", "state", "logs"] {
        let path = root.join(dir);
        fs::create_dir_all(&path).with_context(|| format!("create directory {}", path.display()))?;
    }

    info!(workspace_id = %workspace_id(number), path = %root.display(), "workspace created");
    WorkspaceHandle::from_path(root)
}

/// Open an existing workspace by id.
pub fn get_workspace(base_dir: &Path, id: &str) -> Result<WorkspaceHandle> {
    let root = base_dir.join(id);
    if !root.is_dir() {
        bail!("workspace {id} not found");
    }
    WorkspaceHandle::from_path(root)
}

/// All numbered workspaces, newest first.
pub fn list_workspaces(base_dir: &Path) -> Result<Vec<WorkspaceHandle>> {
    if !base_dir.exists() {
        return Ok(Vec::new());
    }
    let mut workspaces = Vec::new();
    for entry in
        fs::read_dir(base_dir).with_context(|| format!("read directory {}", base_dir.display()))?
    {
        let path = entry
            .with_context(|| format!("read entry in {}", base_dir.display()))?
            .path();
        if build_number_of(&path).is_some() {
            workspaces.push(WorkspaceHandle::from_path(path)?);
        }
    }
    workspaces.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    Ok(workspaces)
}

/// Remove a workspace and everything in it.
pub fn delete_workspace(base_dir: &Path, id: &str) -> Result<()> {
    let root = base_dir.join(id);
    if !root.is_dir() {
        bail!("workspace {id} not found");
    }
    fs::remove_dir_all(&root).with_context(|| format!("remove workspace {}", root.display()))?;
    info!(workspace_id = id, "workspace deleted");
    Ok(())
}

/// Copy `source` into the workspace context area, keeping its file name
/// unless `dest_name` is given.
pub fn copy_file_to_context(
    source: &Path,
    workspace: &WorkspaceHandle,
    dest_name: Option<&str>,
) -> Result<PathBuf> {
    if !source.is_file() {
        bail!("source file not found: {}", source.display());
    }
    let name = match dest_name {
        Some(name) => name.to_string(),
        None => source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("source path has no file name {}", source.display()))?,
    };
    fs::create_dir_all(&workspace.context_dir)
        .with_context(|| format!("create directory {}", workspace.context_dir.display()))?;
    let dest = workspace.context_dir.join(name);
    fs::copy(source, &dest)
        .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
    debug!(source = %source.display(), dest = %dest.display(), "file copied to context");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_workspace_builds_layout_and_numbers_sequentially() {
        let temp = tempfile::tempdir().expect("tempdir");
        let base = temp.path().join("workspaces");

        let first = create_workspace(&base, None).expect("first");
        let second = create_workspace(&base, None).expect("second");

        assert_eq!(first.id, "00001");
        assert_eq!(second.id, "00002");
        for dir in [
            &first.project_dir,
            &first.context_dir,
            &first.state_dir,
            &first.logs_dir,
        ] {
            assert!(dir.is_dir(), "{} should exist", dir.display());
        }
    }

    #[test]
    fn create_workspace_refuses_existing_build_number() {
        let temp = tempfile::tempdir().expect("tempdir");
        create_workspace(temp.path(), Some(7)).expect("create");
        let err = create_workspace(temp.path(), Some(7)).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn next_build_number_ignores_non_numeric_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("00004")).expect("mkdir");
        fs::create_dir_all(temp.path().join("scratch")).expect("mkdir");
        fs::write(temp.path().join("00009"), "file, not dir").expect("write");

        assert_eq!(next_build_number(temp.path()).expect("next"), 5);
    }

    #[test]
    fn list_and_delete_workspaces() {
        let temp = tempfile::tempdir().expect("tempdir");
        create_workspace(temp.path(), None).expect("create");
        create_workspace(temp.path(), None).expect("create");
        fs::create_dir_all(temp.path().join("notes")).expect("mkdir");

        let listed = list_workspaces(temp.path()).expect("list");
        assert_eq!(listed.len(), 2);

        delete_workspace(temp.path(), "00001").expect("delete");
        let ids: Vec<String> = list_workspaces(temp.path())
            .expect("list")
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(ids, vec!["00002".to_string()]);
        assert!(get_workspace(temp.path(), "00001").is_err());
    }

    #[test]
    fn copy_file_to_context_renames_when_asked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = create_workspace(&temp.path().join("ws"), None).expect("create");
        let source = temp.path().join("reverse_string.md");
        fs::write(&source, "reverse a string").expect("write");

        let dest =
            copy_file_to_context(&source, &workspace, Some(PROBLEM_FILE_NAME)).expect("copy");

        assert_eq!(dest, workspace.context_dir.join(PROBLEM_FILE_NAME));
        assert_eq!(fs::read_to_string(dest).expect("read"), "reverse a string");
    }

    #[test]
    fn copy_file_to_context_requires_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = create_workspace(temp.path(), None).expect("create");
        let err =
            copy_file_to_context(&temp.path().join("missing.txt"), &workspace, None).unwrap_err();
        assert!(err.to_string().contains("source file not found"));
    }
}
