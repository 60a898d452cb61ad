//! Development-time tracing.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of the run record.
//!
//! - **Step logs (`io/step_log`)**: Product artifacts in the workspace
//!   `logs/` area. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `info` when `verbose` is set.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=pipeline=debug pipeline run --workflow workflows/code.yaml
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
