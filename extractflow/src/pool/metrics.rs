//! Pool metrics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters describing the work done by a [`FuturesPool`](super::FuturesPool).
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Number of tasks submitted.
    submitted: AtomicU64,
    /// Number of tasks that produced a result.
    completed: AtomicU64,
    /// Number of tasks that failed or panicked.
    failed: AtomicU64,
    /// Number of tasks aborted by close.
    cancelled: AtomicU64,
    /// Highest number of tasks running at once.
    peak_in_flight: AtomicUsize,
}

impl PoolMetrics {
    /// Records a submission with the number of tasks now running.
    pub fn record_submit(&self, in_flight: usize) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.peak_in_flight.fetch_max(in_flight, Ordering::Relaxed);
    }

    /// Records a finished task.
    pub fn record_completion(&self, failed: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records tasks aborted on close.
    pub fn record_cancelled(&self, count: usize) {
        self.cancelled.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns the number of submitted tasks.
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Returns the number of completed tasks, failed ones included.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Returns the number of failed tasks.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Returns the number of cancelled tasks.
    #[must_use]
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns the peak number of concurrently running tasks.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "submitted": self.submitted(),
            "completed": self.completed(),
            "failed": self.failed(),
            "cancelled": self.cancelled(),
            "peak_in_flight": self.peak_in_flight(),
        })
    }
}
