//! Retry policy applied when an attempt fails.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::task::Task;

/// What to do with a task whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again no earlier than the given time.
    RetryAt(DateTime<Utc>),
    /// Retries exhausted.
    Fail,
}

/// Fixed-delay retry policy: every failed attempt waits the same amount of time.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delay: chrono::Duration,
}

impl RetryPolicy {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()),
        }
    }

    pub fn decide(&self, task: &Task, now: DateTime<Utc>) -> RetryDecision {
        if task.can_retry() {
            RetryDecision::RetryAt(now + self.delay)
        } else {
            RetryDecision::Fail
        }
    }
}
