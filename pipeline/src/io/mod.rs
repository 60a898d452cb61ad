//! I/O helpers: filesystem, processes, and persisted formats.

pub mod config;
pub mod process;
pub mod prompt;
pub mod state_store;
pub mod step_log;
pub mod workflow_file;
pub mod workspace;
