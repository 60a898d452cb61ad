//! Error taxonomy for the library boundaries.
//!
//! Step-local failures (backend errors, timeouts, missing outputs, unmet
//! dependencies) are never errors: they are recorded as failed step results.
//! The types here cover what must stop a run before or while it touches the
//! persisted state.

use std::path::PathBuf;

use thiserror::Error;

pub use crate::core::graph::GraphError;

/// Persistence failures of the state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// A snapshot exists but cannot be parsed. Distinct from "no snapshot".
    #[error("corrupt state snapshot {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("read state snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write state snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("no state snapshot in {0}")]
    MissingSnapshot(PathBuf),
}

/// Errors that prevent a run or resume from starting or continuing.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("no state found in workspace {workspace_id}")]
    NoState { workspace_id: String },
    #[error("workflow {workflow_id} is already complete with no failures")]
    AlreadyComplete { workflow_id: String },
    #[error("copy problem file {path}: {message}")]
    ProblemFile { path: PathBuf, message: String },
}
