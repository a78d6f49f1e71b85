//! Fixtures for building pipes and draining iterators in tests.

use super::gate::CountingGate;
use crate::config::ExtractConfig;
use crate::errors::ExtractError;
use crate::items::DataItem;
use crate::iterator::PipeIterator;
use crate::pipe::{Pipe, Stage};
use std::sync::Arc;
use std::time::Duration;

/// A config with a short poll interval, suited to tests.
#[must_use]
pub fn test_config() -> ExtractConfig {
    ExtractConfig::default()
        .with_workers(2)
        .with_poll_interval(Duration::from_millis(1))
}

/// A re-evaluable pipe over fixed numbers.
#[must_use]
pub fn numbers_pipe(name: &str, values: Vec<i64>) -> Pipe<i64> {
    Pipe::from_iter(name, values)
}

/// Drains an iterator into its finished values.
pub fn collect_values<T: DataItem>(iter: PipeIterator<T>) -> Result<Vec<T>, ExtractError> {
    iter.map(|finished| finished.map(|f| f.item)).collect()
}

/// Drains an iterator into `(pipe name, value)` pairs.
pub fn collect_by_pipe<T: DataItem>(iter: PipeIterator<T>) -> Result<Vec<(String, T)>, ExtractError> {
    iter.map(|finished| finished.map(|f| (f.pipe_name().to_string(), f.item)))
        .collect()
}

/// A stage that passes every item through a blocking task holding `gate` for `delay`.
pub fn gated_stage<T: DataItem>(name: &str, gate: Arc<CountingGate>, delay: Duration) -> Stage<T> {
    Stage::defer(name, move |item| {
        let _inside = gate.enter();
        std::thread::sleep(delay);
        Ok(item)
    })
}
