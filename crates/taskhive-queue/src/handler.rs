//! Task handlers and the registry mapping task types to them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::TaskError;
use crate::task::{Payload, Task};

/// Executes tasks of one type.
///
/// Delivery is at-least-once: after a crash the same task may be executed again,
/// so implementations should be safe to re-run.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the task and produce its result.
    async fn execute(&self, task: &Task) -> Result<Payload, TaskError>;

    /// Called after the task completed.
    async fn on_success(&self, _task: &Task, _result: &Payload) {}

    /// Called after the final failed attempt.
    async fn on_failure(&self, _task: &Task, _error: &TaskError) {}

    /// Called when a failed attempt has been scheduled for retry.
    async fn on_retry(&self, _task: &Task, _error: &TaskError) {}
}

/// Registry of handlers keyed by task type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        let mut handlers = self.handlers.write();
        if handlers.insert(task_type.clone(), handler).is_some() {
            warn!(task_type = %task_type, "Replaced existing task handler");
        } else {
            debug!(task_type = %task_type, "Registered task handler");
        }
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.read().contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn execute(&self, task: &Task) -> Result<Payload, TaskError> {
            Ok(task.payload.clone())
        }
    }

    struct Refuse;

    #[async_trait]
    impl TaskHandler for Refuse {
        async fn execute(&self, _task: &Task) -> Result<Payload, TaskError> {
            Err(TaskError::handler("refused"))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());

        registry.register("echo", Arc::new(Echo));
        registry.register("refuse", Arc::new(Refuse));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("echo"));
        assert!(registry.get("ghost").is_none());
        assert_eq!(registry.task_types(), vec!["echo", "refuse"]);
    }

    #[tokio::test]
    async fn test_register_replaces() {
        let registry = HandlerRegistry::new();
        registry.register("job", Arc::new(Echo));
        registry.register("job", Arc::new(Refuse));
        assert_eq!(registry.len(), 1);

        let handler = registry.get("job").unwrap();
        let task = Task::new("job", Payload::new());
        assert_eq!(
            handler.execute(&task).await,
            Err(TaskError::handler("refused"))
        );
    }

    #[tokio::test]
    async fn test_default_hooks_are_noops() {
        let task = Task::new("echo", Payload::new());
        let handler = Echo;
        handler.on_success(&task, &Payload::new()).await;
        handler.on_retry(&task, &TaskError::Timeout(1)).await;
        handler.on_failure(&task, &TaskError::Timeout(1)).await;
    }
}
