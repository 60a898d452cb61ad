//! Resumable workflow pipeline for agent-driven steps.
//!
//! A workflow is a graph of steps with declared outputs and dependencies.
//! The pipeline resolves an execution order, runs each step through a
//! pluggable backend, and persists progress after every transition so an
//! interrupted or failed run can be resumed.
//!
//! - **[`core`]**: Pure, deterministic logic (graph ordering, run state,
//!   fingerprints). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (workspaces, state snapshots,
//!   processes, workflow files).
//! - **[`backend`]**: Execution backends behind the [`backend::Backend`] trait.
//!
//! [`step`] runs a single step; [`orchestrator`] drives a whole workflow and
//! implements the resume protocol.

pub mod backend;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{GraphError, OrchestratorError, StateError};
pub use orchestrator::Orchestrator;
