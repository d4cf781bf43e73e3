//! Lifecycle runtime.
//!
//! - `options`: configuration struct and environment parsing.
//! - `core`: the `VpsliteRuntime` orchestrator.

pub mod core;
pub mod options;

pub use core::{DeleteOutcome, VpsliteRuntime};
pub use options::VpsliteOptions;
