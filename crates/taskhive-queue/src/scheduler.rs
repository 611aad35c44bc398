//! Next-task selection and queue-age expiry.

use std::cmp::{Ordering, Reverse};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::task::Task;

/// Picks the next eligible task.
///
/// Eligible means queued (pending or retrying), past its scheduled time and younger
/// than the maximum age. Among eligible tasks the highest priority wins, then the
/// earliest `created_at`, then the earliest arrival.
#[derive(Debug, Clone)]
pub struct Selector {
    max_age: chrono::Duration,
}

impl Selector {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age: chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100)),
        }
    }

    pub fn max_age(&self) -> chrono::Duration {
        self.max_age
    }

    /// Whether the task has waited longer than the maximum age.
    pub fn is_expired(&self, task: &Task, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(task.created_at) > self.max_age
    }

    pub fn is_eligible(&self, task: &Task, now: DateTime<Utc>) -> bool {
        task.is_ready(now) && !self.is_expired(task, now)
    }

    /// Select the next task among `(arrival_seq, task)` pairs.
    ///
    /// `can_run` filters out tasks that cannot be executed right now, such as
    /// task types without a registered handler.
    pub fn next_eligible<'a, I, F>(&self, tasks: I, now: DateTime<Utc>, can_run: F) -> Option<Uuid>
    where
        I: IntoIterator<Item = (u64, &'a Task)>,
        F: Fn(&Task) -> bool,
    {
        tasks
            .into_iter()
            .filter(|(_, task)| self.is_eligible(task, now) && can_run(task))
            .min_by(|(a_seq, a), (b_seq, b)| dispatch_order(a, *a_seq, b, *b_seq))
            .map(|(_, task)| task.id)
    }

    /// Mark queued tasks past the maximum age as expired.
    ///
    /// Returns copies of the tasks that changed.
    pub fn expire_stale<'a, I>(&self, tasks: I, now: DateTime<Utc>) -> Vec<Task>
    where
        I: IntoIterator<Item = &'a mut Task>,
    {
        let mut expired = Vec::new();
        for task in tasks {
            if task.status.is_queued() && self.is_expired(task, now) {
                task.mark_expired(now);
                expired.push(task.clone());
            }
        }
        expired
    }
}

/// Dispatch order: higher priority first, then FIFO.
fn dispatch_order(a: &Task, a_seq: u64, b: &Task, b_seq: u64) -> Ordering {
    (Reverse(a.priority), a.created_at, a_seq).cmp(&(Reverse(b.priority), b.created_at, b_seq))
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
