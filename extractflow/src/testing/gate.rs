//! A gate counting concurrent entries.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts how many callers are inside at once and remembers the peak.
#[derive(Debug, Default)]
pub struct CountingGate {
    current: AtomicUsize,
    peak: AtomicUsize,
    entered: AtomicUsize,
}

impl CountingGate {
    /// Creates a new gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters the gate; the returned guard leaves it on drop.
    pub fn enter(&self) -> GateGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entered.fetch_add(1, Ordering::SeqCst);
        GateGuard { gate: self }
    }

    /// Returns the number of callers inside.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Returns the highest number of callers inside at once.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Returns the total number of entries.
    #[must_use]
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

/// Leaves the gate when dropped.
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a CountingGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.current.fetch_sub(1, Ordering::SeqCst);
    }
}
