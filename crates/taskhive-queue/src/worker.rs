//! Worker pool for task execution.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::TaskError;
use crate::handler::TaskHandler;
use crate::inner::{Outcome, QueueInner};
use crate::task::{Payload, Task};

/// Worker pool for concurrent task execution.
///
/// Spawns one loop per worker slot. Each loop holds a semaphore permit while it
/// claims and runs a task, so at most `max_workers` tasks execute at once.
pub(crate) struct WorkerPool {
    inner: Arc<QueueInner>,
}

impl WorkerPool {
    pub(crate) fn new(inner: Arc<QueueInner>) -> Self {
        Self { inner }
    }

    /// Spawn the worker loops. They stop once `token` is cancelled.
    pub(crate) fn spawn(&self, token: &CancellationToken) -> Vec<JoinHandle<()>> {
        let count = self.inner.config.worker_count();
        info!("Worker pool started with {} workers", count);
        (0..count)
            .map(|worker_id| {
                tokio::spawn(run_worker(worker_id, self.inner.clone(), token.clone()))
            })
            .collect()
    }
}

async fn run_worker(worker_id: usize, inner: Arc<QueueInner>, token: CancellationToken) {
    debug!(worker = worker_id, "Worker started");

    loop {
        let permit = tokio::select! {
            // stop wins over a free permit once shutdown is signalled
            biased;
            _ = token.cancelled() => break,
            permit = inner.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let Some(task) = inner.claim_next() else {
            drop(permit);
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(inner.config.poll_interval()) => {}
            }
            continue;
        };

        let span = tracing::info_span!(
            "task",
            task_id = %task.id,
            task_type = %task.task_type,
            worker = worker_id,
        );
        process(&inner, task).instrument(span).await;
        drop(permit);
    }

    debug!(worker = worker_id, "Worker stopped");
}

/// Run one claimed task to an outcome and apply it.
async fn process(inner: &QueueInner, task: Task) {
    let started = Instant::now();
    let handler = inner.registry.get(&task.task_type);
    let result = match &handler {
        Some(handler) => execute(handler.clone(), task.clone()).await,
        None => Err(TaskError::handler(format!(
            "No handler registered for task type '{}'",
            task.task_type
        ))),
    };
    let elapsed = started.elapsed();

    let Some((task, outcome)) = inner.finish(task.id, result) else {
        debug!("Task was released while running; outcome discarded");
        return;
    };
    inner.stats.record_processed(elapsed);

    match &outcome {
        Outcome::Completed(_) => {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "Task completed")
        }
        Outcome::Retrying(e) => warn!(
            attempt = task.retry_count,
            max_retries = task.max_retries,
            "Task failed, retry scheduled: {}",
            e
        ),
        Outcome::Failed(e) => warn!(retries = task.retry_count, "Task failed: {}", e),
    }

    if let Some(handler) = handler {
        run_hook(handler, task, outcome).await;
    }
}

/// Execute the handler in its own task, bounded by the task timeout.
///
/// A panic in the handler is reported as [`TaskError::Panicked`]; on timeout the
/// handler task is aborted.
pub(crate) async fn execute(handler: Arc<dyn TaskHandler>, task: Task) -> Result<Payload, TaskError> {
    let timeout = task.timeout();
    let timeout_secs = task.timeout_secs;
    let run = AbortOnDropHandle::new(tokio::spawn(async move { handler.execute(&task).await }));

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            let message = join_error_message(join_error);
            error!("Task handler panicked: {}", message);
            Err(TaskError::Panicked(message))
        }
        Err(_) => Err(TaskError::Timeout(timeout_secs)),
    }
}

/// Run the outcome hook, bounded by the task's own timeout.
async fn run_hook(handler: Arc<dyn TaskHandler>, task: Task, outcome: Outcome) {
    let limit = task.timeout();
    let hook = AbortOnDropHandle::new(tokio::spawn(async move {
        match outcome {
            Outcome::Completed(result) => handler.on_success(&task, &result).await,
            Outcome::Retrying(e) => handler.on_retry(&task, &e).await,
            Outcome::Failed(e) => handler.on_failure(&task, &e).await,
        }
    }));

    match tokio::time::timeout(limit, hook).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Task hook did not finish: {}", join_error_message(e)),
        Err(_) => warn!(timeout_secs = limit.as_secs(), "Task hook timed out and was aborted"),
    }
}

fn join_error_message(error: JoinError) -> String {
    if error.is_panic() {
        panic_message(&*error.into_panic())
    } else {
        "task was cancelled".to_string()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
