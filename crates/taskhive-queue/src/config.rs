//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of concurrent workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Fixed delay before a failed task becomes eligible again, in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// How long an idle worker sleeps before polling again, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maintenance sweep period in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Age after which queued tasks expire and finished tasks are evicted, in seconds.
    #[serde(default = "default_task_max_age")]
    pub task_max_age_secs: u64,

    /// Maximum number of unfinished tasks (0 = unlimited).
    #[serde(default)]
    pub max_queue_size: usize,

    /// Retries granted to a task when the caller does not say.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Execution timeout applied when the caller does not say, in seconds.
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,

    /// Buffer size of the task event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_workers() -> usize {
    4
}

fn default_retry_delay() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    100
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_task_max_age() -> u64 {
    24 * 60 * 60
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    300
}

fn default_event_capacity() -> usize {
    256
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            retry_delay_secs: default_retry_delay(),
            poll_interval_ms: default_poll_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            task_max_age_secs: default_task_max_age(),
            max_queue_size: 0,
            default_max_retries: default_max_retries(),
            default_timeout_secs: default_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl QueueConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn task_max_age(&self) -> Duration {
        Duration::from_secs(self.task_max_age_secs)
    }

    /// Worker count, never below one.
    pub fn worker_count(&self) -> usize {
        self.max_workers.max(1)
    }
}
