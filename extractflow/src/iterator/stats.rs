//! Iteration statistics.

use serde::Serialize;

/// Counters kept by a [`PipeIterator`](super::PipeIterator) while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    /// Finished items handed to the caller.
    pub items_yielded: u64,
    /// Items pulled from sources.
    pub items_pulled: u64,
    /// Sources registered, initial ones included.
    pub sources_added: u64,
    /// Sources removed after exhaustion.
    pub sources_exhausted: u64,
    /// Deferred tasks handed to the pool.
    pub tasks_submitted: u64,
    /// Round-robin selections that fell back to fifo.
    pub fifo_switches: u64,
}

impl ExtractStats {
    /// Converts the stats to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
