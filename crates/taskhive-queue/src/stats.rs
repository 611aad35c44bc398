//! Worker pool statistics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters updated by workers as attempts finish.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Attempts that ran to an outcome (success, failure or retry).
    pub tasks_processed: AtomicU64,

    /// Attempts that completed successfully.
    pub tasks_completed: AtomicU64,

    /// Tasks that failed with retries exhausted.
    pub tasks_failed: AtomicU64,

    /// Failed attempts that were scheduled for another try.
    pub tasks_retried: AtomicU64,

    /// Total execution time (microseconds).
    pub processing_time_us: AtomicU64,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished attempt and how long it ran.
    pub fn record_processed(&self, elapsed: Duration) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.processing_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Seed counters from a previous run's snapshot.
    pub fn restore(&self, snapshot: &StatsSnapshot) {
        self.tasks_processed
            .store(snapshot.tasks_processed, Ordering::Relaxed);
        self.tasks_completed
            .store(snapshot.tasks_completed, Ordering::Relaxed);
        self.tasks_failed.store(snapshot.tasks_failed, Ordering::Relaxed);
        self.tasks_retried.store(snapshot.tasks_retried, Ordering::Relaxed);
        let micros = (snapshot.total_processing_time * 1_000_000.0).max(0.0) as u64;
        self.processing_time_us.store(micros, Ordering::Relaxed);
    }

    /// Get a snapshot of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let processed = self.tasks_processed.load(Ordering::Relaxed);
        let total_secs = self.processing_time_us.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        StatsSnapshot {
            tasks_processed: processed,
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            total_processing_time: total_secs,
            avg_processing_time: if processed == 0 {
                0.0
            } else {
                total_secs / processed as f64
            },
        }
    }
}

/// Point-in-time copy of [`PoolStats`]. Times are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub tasks_processed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub total_processing_time: f64,
    pub avg_processing_time: f64,
}

/// Service-wide statistics returned by `QueueService::stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub totals: StatsSnapshot,
    pub total_tasks: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub priority_counts: BTreeMap<String, usize>,
    pub type_counts: BTreeMap<String, usize>,
    pub active_workers: usize,
    pub max_workers: usize,
    pub running: bool,
    pub handlers_registered: usize,
}
