//! Mock sources for testing.

use crate::items::{Pull, Source};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What happened to a [`RecordingSource`].
#[derive(Debug, Default)]
pub struct SourceLog {
    pulls: AtomicUsize,
    closes: AtomicUsize,
}

impl SourceLog {
    /// Returns the number of pulls.
    #[must_use]
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Returns the number of close calls.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// A source over fixed values that records pulls and closes.
#[derive(Debug)]
pub struct RecordingSource<T> {
    values: VecDeque<T>,
    log: Arc<SourceLog>,
}

impl<T> RecordingSource<T> {
    /// Creates a source and returns it together with its log.
    pub fn new(values: impl IntoIterator<Item = T>) -> (Self, Arc<SourceLog>) {
        let log = Arc::new(SourceLog::default());
        let source = Self {
            values: values.into_iter().collect(),
            log: Arc::clone(&log),
        };
        (source, log)
    }
}

impl<T: Send> Source<T> for RecordingSource<T> {
    fn next_item(&mut self) -> anyhow::Result<Pull<T>> {
        self.log.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(self.values.pop_front().map_or(Pull::Exhausted, Pull::value))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        self.values.clear();
        Ok(())
    }
}

/// A source that yields some values and then fails.
#[derive(Debug)]
pub struct FailingSource<T> {
    values: VecDeque<T>,
    message: String,
}

impl<T> FailingSource<T> {
    /// Creates a source failing with `message` once `values` are used up.
    pub fn new(values: impl IntoIterator<Item = T>, message: impl Into<String>) -> Self {
        Self {
            values: values.into_iter().collect(),
            message: message.into(),
        }
    }
}

impl<T: Send> Source<T> for FailingSource<T> {
    fn next_item(&mut self) -> anyhow::Result<Pull<T>> {
        match self.values.pop_front() {
            Some(value) => Ok(Pull::value(value)),
            None => Err(anyhow::anyhow!("{}", self.message)),
        }
    }
}
