//! Built-in task handlers used by `run` and `demo`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use taskhive_queue::{Payload, QueueService, Task, TaskError, TaskHandler};

/// Returns its payload unchanged, stamped with the completion time.
pub(crate) struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn execute(&self, task: &Task) -> Result<Payload, TaskError> {
        let mut result = task.payload.clone();
        result.insert(
            "echoed_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        Ok(result)
    }
}

/// Sleeps for `millis` (default 100) before completing.
pub(crate) struct SleepHandler;

impl SleepHandler {
    const DEFAULT_MILLIS: u64 = 100;
}

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn execute(&self, task: &Task) -> Result<Payload, TaskError> {
        let millis = task
            .payload
            .get("millis")
            .and_then(Value::as_u64)
            .unwrap_or(Self::DEFAULT_MILLIS);
        debug!(task_id = %task.id, millis, "Sleeping");
        tokio::time::sleep(Duration::from_millis(millis)).await;

        let mut result = Payload::new();
        result.insert("slept_ms".to_string(), Value::from(millis));
        Ok(result)
    }
}

/// Fails its first `fail_times` (default 1) attempts, then succeeds.
pub(crate) struct FlakyHandler;

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn execute(&self, task: &Task) -> Result<Payload, TaskError> {
        let fail_times = task
            .payload
            .get("fail_times")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        if u64::from(task.retry_count) < fail_times {
            return Err(TaskError::handler(format!(
                "attempt {} of {} failed on purpose",
                task.retry_count + 1,
                fail_times + 1
            )));
        }

        let mut result = Payload::new();
        result.insert("attempts".to_string(), Value::from(task.retry_count + 1));
        Ok(result)
    }

    async fn on_retry(&self, task: &Task, error: &TaskError) {
        info!(task_id = %task.id, retry_count = task.retry_count, %error, "Flaky task will retry");
    }
}

/// Register the built-in handlers under `echo`, `sleep` and `flaky`.
pub(crate) fn register_builtin_handlers(service: &QueueService) {
    service.register("echo", Arc::new(EchoHandler));
    service.register("sleep", Arc::new(SleepHandler));
    service.register("flaky", Arc::new(FlakyHandler));
}
