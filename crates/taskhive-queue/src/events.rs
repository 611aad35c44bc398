//! Task lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::task::Task;

/// Kind of lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEventKind {
    Enqueued,
    Started,
    Completed,
    /// A failed attempt was scheduled for another try.
    Retrying { attempt: u32 },
    Failed,
    Cancelled,
    Expired,
    /// Removed from the live table by the sweeper.
    Swept,
}

/// A lifecycle transition of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub task_type: String,
    #[serde(flatten)]
    pub kind: TaskEventKind,
    pub at: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(task: &Task, kind: TaskEventKind) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            kind,
            at: Utc::now(),
        }
    }
}

/// Best-effort broadcast of task events.
#[derive(Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Send an event; dropped silently when nobody listens.
    pub(crate) fn emit(&self, task: &Task, kind: TaskEventKind) {
        let _ = self.sender.send(TaskEvent::new(task, kind));
    }
}
