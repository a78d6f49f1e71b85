//! Testing utilities for extraction pipelines.
//!
//! This module provides:
//! - A counting gate to observe how many deferred tasks run at once
//! - Recording and failing sources
//! - Fixtures for building pipes and collecting iterator output

mod fixtures;
mod gate;
mod mocks;

pub use fixtures::{collect_by_pipe, collect_values, gated_stage, numbers_pipe, test_config};
pub use gate::{CountingGate, GateGuard};
pub use mocks::{FailingSource, RecordingSource, SourceLog};
