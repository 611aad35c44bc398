//! Queue errors.

use thiserror::Error;

/// Errors returned synchronously to queue callers.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No handler is registered for the task type.
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    /// Enqueue options failed validation.
    #[error("Invalid task options: {0}")]
    InvalidOptions(String),

    /// Queue is full.
    #[error("Queue is full")]
    QueueFull,

    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// The service has been shut down.
    #[error("Queue service has been shut down")]
    ShutDown,

    /// Durable storage failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single task execution.
///
/// These never reach enqueue callers; they end up in `Task::error_message`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The handler reported an error.
    #[error("{0}")]
    Handler(String),

    /// Execution exceeded the task timeout.
    #[error("Task timeout after {0}s")]
    Timeout(u64),

    /// The handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Convenience constructor for handler implementations.
    pub fn handler(message: impl Into<String>) -> Self {
        TaskError::Handler(message.into())
    }
}
