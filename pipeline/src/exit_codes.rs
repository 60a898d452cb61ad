//! Stable exit codes for pipeline CLI commands.

/// Command succeeded; for `run`/`resume`, every step completed.
pub const OK: i32 = 0;
/// `run` or `resume` finished with at least one failed step.
pub const FAILED: i32 = 1;
/// Invalid usage, workflow, config, or state; nothing was executed.
pub const INVALID: i32 = 2;
