//! Counters maintained by the backend thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for the backend worker.
///
/// Written only by the backend thread, readable from anywhere.
#[derive(Debug, Default)]
pub struct BackendMetrics {
    /// Merge-and-dispatch iterations in the main phase.
    iterations: AtomicU64,
    /// Main-phase iterations that found no record and slept.
    idle_iterations: AtomicU64,
    /// Records handed to handlers, drain included.
    records_processed: AtomicU64,
    /// Records handed to handlers during the exit drain.
    drained_records: AtomicU64,
}

impl BackendMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_iteration(&self, processed: bool) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        if processed {
            self.records_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.idle_iterations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_drained(&self) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
        self.drained_records.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns main-phase iterations.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Returns idle main-phase iterations.
    #[must_use]
    pub fn idle_iterations(&self) -> u64 {
        self.idle_iterations.load(Ordering::Relaxed)
    }

    /// Returns records dispatched.
    #[must_use]
    pub fn records_processed(&self) -> u64 {
        self.records_processed.load(Ordering::Relaxed)
    }

    /// Returns records dispatched during the exit drain.
    #[must_use]
    pub fn drained_records(&self) -> u64 {
        self.drained_records.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> BackendMetricsSnapshot {
        BackendMetricsSnapshot {
            iterations: self.iterations(),
            idle_iterations: self.idle_iterations(),
            records_processed: self.records_processed(),
            drained_records: self.drained_records(),
        }
    }
}

/// Snapshot of backend metrics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendMetricsSnapshot {
    /// Main-phase iterations.
    pub iterations: u64,
    /// Idle main-phase iterations.
    pub idle_iterations: u64,
    /// Records dispatched.
    pub records_processed: u64,
    /// Records dispatched during the exit drain.
    pub drained_records: u64,
}
