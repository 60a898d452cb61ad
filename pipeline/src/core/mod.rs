//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! workflow definitions and run state and return deterministic outputs
//! suitable for tests.

pub mod fingerprint;
pub mod graph;
pub mod state;
pub mod types;
