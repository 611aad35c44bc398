//! Periodic maintenance: expire stale tasks and evict old finished ones.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::TaskEventKind;
use crate::inner::QueueInner;
use crate::task::Task;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Queued tasks that passed the maximum age.
    pub expired: usize,
    /// Finished tasks removed from the live table.
    pub removed: usize,
}

/// Run one sweep at `now`.
pub(crate) fn sweep(inner: &QueueInner, now: DateTime<Utc>) -> SweepReport {
    let expired = inner.expire_stale(now);

    let max_age = inner.selector.max_age();
    let removed: Vec<Task> = {
        let mut table = inner.table.lock();
        let old: Vec<_> = table
            .tasks()
            .filter(|task| task.status.is_final())
            .filter(|task| {
                task.completed_at
                    .is_some_and(|done| now.signed_duration_since(done) > max_age)
            })
            .map(|task| task.id)
            .collect();
        old.iter().filter_map(|id| table.remove(id)).collect()
    };

    for task in &removed {
        inner.persister.delete(task.id);
        inner.events.emit(task, TaskEventKind::Swept);
    }

    let report = SweepReport {
        expired,
        removed: removed.len(),
    };
    if report.removed > 0 || report.expired > 0 {
        info!(
            expired = report.expired,
            removed = report.removed,
            "Maintenance sweep finished"
        );
    }
    report
}

/// Sweep every `cleanup_interval` until `token` is cancelled.
pub(crate) async fn run_sweeper(inner: Arc<QueueInner>, token: CancellationToken) {
    let period = inner.config.cleanup_interval().max(MIN_SWEEP_INTERVAL);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;

    debug!(period_secs = period.as_secs(), "Sweeper started");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                sweep(&inner, Utc::now());
            }
        }
    }
    debug!("Sweeper stopped");
}
