//! Task definition and status.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque key/value data carried by a task and returned by handlers.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Task priority levels. Higher runs first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum TaskPriority {
    /// Low priority.
    Low = 1,
    /// Medium priority.
    #[default]
    Medium = 2,
    /// High priority.
    High = 3,
    /// Critical priority.
    Critical = 4,
    /// Urgent priority.
    Urgent = 5,
}

impl TaskPriority {
    /// All priorities, lowest first.
    pub const ALL: [TaskPriority; 5] = [
        TaskPriority::Low,
        TaskPriority::Medium,
        TaskPriority::High,
        TaskPriority::Critical,
        TaskPriority::Urgent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
            TaskPriority::Urgent => "urgent",
        }
    }
}

impl From<TaskPriority> for u8 {
    fn from(priority: TaskPriority) -> Self {
        priority as u8
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TaskPriority::Low),
            2 => Ok(TaskPriority::Medium),
            3 => Ok(TaskPriority::High),
            4 => Ok(TaskPriority::Critical),
            5 => Ok(TaskPriority::Urgent),
            other => Err(format!("priority must be between 1 and 5, got {}", other)),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "critical" => Ok(TaskPriority::Critical),
            "urgent" => Ok(TaskPriority::Urgent),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Task status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in queue.
    #[default]
    Pending,
    /// Currently being processed.
    Running,
    /// Failed, waiting for its retry time.
    Retrying,
    /// Completed successfully.
    Completed,
    /// Failed with retries exhausted.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
    /// Sat in the queue past the maximum age.
    Expired,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Retrying,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Expired => "expired",
        }
    }

    /// Completed, failed or cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// No transition leaves this status (terminal or expired).
    pub fn is_final(self) -> bool {
        self.is_terminal() || self == TaskStatus::Expired
    }

    /// Waiting to be picked up by a worker.
    pub fn is_queued(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retrying)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Caller-supplied options for a new task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    #[serde(default)]
    pub priority: TaskPriority,
    /// Seconds to wait before the task becomes eligible.
    #[serde(default)]
    pub delay_secs: u64,
    /// Falls back to the queue default when unset.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Falls back to the queue default when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Payload,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A task in the queue.
///
/// This struct is also the persisted record: its serde shape is the on-disk format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: Uuid,
    /// Handler key.
    pub task_type: String,
    /// Handler input.
    #[serde(default)]
    pub payload: Payload,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// Earliest execution time (None = immediate).
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    /// Execution deadline in seconds.
    #[serde(rename = "timeout_seconds")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<Payload>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Payload,
}

impl Task {
    /// Create a pending task with default options.
    pub fn new(task_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            payload,
            priority: TaskPriority::Medium,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: 3,
            timeout_secs: 300,
            error_message: None,
            result: None,
            tags: BTreeSet::new(),
            metadata: Payload::new(),
        }
    }

    /// Set task priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set scheduled execution time.
    pub fn with_scheduled_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(time);
        self
    }

    /// Set maximum retries.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set execution timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Execution deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check if task can be retried.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Queued and past its scheduled time.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        if !self.status.is_queued() {
            return false;
        }

        match self.scheduled_at {
            Some(scheduled) => scheduled <= now,
            None => true,
        }
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag))
    }

    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
    }

    pub(crate) fn mark_completed(&mut self, result: Payload, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.result = Some(result);
        self.error_message = None;
    }

    pub(crate) fn schedule_retry(&mut self, error: String, retry_at: DateTime<Utc>) {
        self.status = TaskStatus::Retrying;
        self.retry_count += 1;
        self.scheduled_at = Some(retry_at);
        self.error_message = Some(error);
    }

    pub(crate) fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = Some(error);
    }

    pub(crate) fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
    }

    pub(crate) fn mark_expired(&mut self, now: DateTime<Utc>) {
        let age = now - self.created_at;
        self.status = TaskStatus::Expired;
        self.completed_at = Some(now);
        self.error_message = Some(format!(
            "Task expired after {}h in queue",
            age.num_hours()
        ));
    }

    /// Undo a claim that can no longer finish (restart or forced shutdown).
    pub(crate) fn reset_interrupted(&mut self) {
        if self.status == TaskStatus::Running {
            self.status = TaskStatus::Pending;
            self.started_at = None;
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
