//! The extraction scheduler.
//!
//! This module provides:
//! - `PipeIterator`, which pulls items from sources and drives them through pipes
//! - Pending and finished items
//! - Iteration statistics

mod cursor;
mod fork_plan;
mod integration_tests;
mod pipe_iterator;
mod stats;

pub use cursor::{FinishedItem, PendingItem};
pub use pipe_iterator::PipeIterator;
pub use stats::ExtractStats;
