//! Queue service façade.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::events::{TaskEvent, TaskEventKind};
use crate::handler::TaskHandler;
use crate::inner::QueueInner;
use crate::stats::QueueStats;
use crate::store::{QueueSnapshot, TaskStore};
use crate::sweeper::{SweepReport, run_sweeper, sweep};
use crate::task::{Payload, Task, TaskOptions, TaskPriority, TaskStatus};
use crate::worker::WorkerPool;

enum Lifecycle {
    Created,
    Running(Loops),
    ShutDown,
}

struct Loops {
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
}

/// The queue: accepts work, runs it on a bounded worker pool, and tracks outcomes.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use taskhive_queue::{Payload, QueueConfig, QueueService, TaskOptions, TaskPriority};
/// # async fn demo(handler: Arc<dyn taskhive_queue::TaskHandler>) -> Result<(), taskhive_queue::QueueError> {
/// let service = QueueService::new(QueueConfig::default());
/// service.register("report", handler);
/// service.start().await?;
///
/// let id = service.enqueue(
///     "report",
///     Payload::new(),
///     TaskOptions::new().priority(TaskPriority::High),
/// )?;
/// println!("{:?}", service.get_task(&id).map(|t| t.status));
///
/// service.shutdown(Duration::from_secs(30)).await;
/// # Ok(())
/// # }
/// ```
pub struct QueueService {
    inner: Arc<QueueInner>,
    lifecycle: Mutex<Lifecycle>,
}

impl QueueService {
    /// Create a service without persistence.
    pub fn new(config: QueueConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a service that persists tasks to `store`.
    pub fn with_store(config: QueueConfig, store: Arc<dyn TaskStore>) -> Self {
        Self::build(config, Some(store))
    }

    fn build(config: QueueConfig, store: Option<Arc<dyn TaskStore>>) -> Self {
        Self {
            inner: Arc::new(QueueInner::new(config, store)),
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Register the handler for a task type.
    pub fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.inner.registry.register(task_type, handler);
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        self.inner.registry.task_types()
    }

    /// Subscribe to task lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Add a task to the queue.
    pub fn enqueue(
        &self,
        task_type: &str,
        payload: Payload,
        options: TaskOptions,
    ) -> Result<Uuid, QueueError> {
        if self.inner.is_closed() {
            return Err(QueueError::ShutDown);
        }
        if task_type.trim().is_empty() {
            return Err(QueueError::InvalidOptions(
                "task type must not be empty".to_string(),
            ));
        }
        if !self.inner.registry.contains(task_type) {
            return Err(QueueError::UnknownTaskType(task_type.to_string()));
        }

        let config = &self.inner.config;
        let timeout_secs = options.timeout_secs.unwrap_or(config.default_timeout_secs);
        if timeout_secs == 0 {
            return Err(QueueError::InvalidOptions(
                "timeout must be at least one second".to_string(),
            ));
        }

        let mut task = Task::new(task_type, payload)
            .with_priority(options.priority)
            .with_max_retries(options.max_retries.unwrap_or(config.default_max_retries))
            .with_timeout_secs(timeout_secs);
        if options.delay_secs > 0 {
            let scheduled_at = i64::try_from(options.delay_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .and_then(|delay| task.created_at.checked_add_signed(delay))
                .ok_or_else(|| {
                    QueueError::InvalidOptions(format!(
                        "delay of {}s is out of range",
                        options.delay_secs
                    ))
                })?;
            task = task.with_scheduled_at(scheduled_at);
        }
        task.tags = options.tags;
        task.metadata = options.metadata;

        {
            let mut table = self.inner.table.lock();
            let limit = config.max_queue_size;
            if limit > 0 && table.unfinished() >= limit {
                return Err(QueueError::QueueFull);
            }
            table.insert(task.clone());
            // must precede any claim, which can happen as soon as the lock is released
            self.inner.publish(&task, TaskEventKind::Enqueued);
        }

        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = %task.priority,
            "Task enqueued"
        );
        Ok(task.id)
    }

    /// Cancel a queued task. Returns false unless the task was pending or retrying.
    pub fn cancel(&self, id: &Uuid) -> bool {
        let mut table = self.inner.table.lock();
        match table.get_mut(id) {
            Some(task) if task.status.is_queued() => {
                task.mark_cancelled(Utc::now());
                info!(task_id = %task.id, "Task cancelled");
                self.inner.publish(task, TaskEventKind::Cancelled);
                true
            }
            _ => false,
        }
    }

    pub fn get_task(&self, id: &Uuid) -> Option<Task> {
        self.inner.table.lock().get(id).cloned()
    }

    /// Tasks of one type, optionally with one status, oldest first.
    pub fn get_tasks_by_type(&self, task_type: &str, status: Option<TaskStatus>) -> Vec<Task> {
        self.collect_tasks(|task| {
            task.task_type == task_type && status.is_none_or(|s| task.status == s)
        })
    }

    /// Tasks carrying any of `tags`, oldest first.
    pub fn get_tasks_by_tags(&self, tags: &[String]) -> Vec<Task> {
        self.collect_tasks(|task| task.has_any_tag(tags))
    }

    /// Every tracked task, optionally with one status, oldest first.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        self.collect_tasks(|task| status.is_none_or(|s| task.status == s))
    }

    fn collect_tasks(&self, matches: impl Fn(&Task) -> bool) -> Vec<Task> {
        let table = self.inner.table.lock();
        let mut found: Vec<(u64, &Task)> = table.sequenced().filter(|(_, t)| matches(t)).collect();
        found.sort_by_key(|(seq, task)| (task.created_at, *seq));
        found.into_iter().map(|(_, task)| task.clone()).collect()
    }

    /// Reload persisted state and start the workers and the sweeper.
    ///
    /// Calling this while running does nothing; after shutdown it fails with
    /// [`QueueError::ShutDown`].
    pub async fn start(&self) -> Result<(), QueueError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::ShutDown => return Err(QueueError::ShutDown),
        }

        self.restore().await;
        self.inner.persister.ensure_writer();

        let token = CancellationToken::new();
        let workers = WorkerPool::new(self.inner.clone()).spawn(&token);
        let sweeper = tokio::spawn(run_sweeper(self.inner.clone(), token.clone()));
        self.inner.running.store(true, Ordering::SeqCst);
        *lifecycle = Lifecycle::Running(Loops {
            token,
            workers,
            sweeper,
        });

        info!(
            max_workers = self.inner.config.worker_count(),
            handlers = self.inner.registry.len(),
            "Queue service started"
        );
        Ok(())
    }

    /// Load the snapshot and per-task records into the live table.
    async fn restore(&self) {
        let Some(store) = self.inner.persister.store().cloned() else {
            return;
        };

        let snapshot = store.load_snapshot().await.unwrap_or_else(|e| {
            warn!("Failed to load queue snapshot: {}", e);
            None
        });
        let records = store.load_all().await.unwrap_or_else(|e| {
            warn!("Failed to load persisted tasks: {}", e);
            Vec::new()
        });

        let mut candidates = Vec::new();
        let had_snapshot = snapshot.is_some();
        if let Some(snapshot) = snapshot {
            self.inner.stats.restore(&snapshot.stats);
            candidates.extend(snapshot.tasks);
        }
        candidates.extend(records);

        let now = Utc::now();
        let max_age = self.inner.selector.max_age();
        let mut seen = HashSet::new();
        let mut restored = Vec::new();
        let mut finished = Vec::new();
        for mut task in candidates {
            if !seen.insert(task.id) {
                continue;
            }
            if task.status.is_final() {
                let evictable = task
                    .completed_at
                    .is_none_or(|done| now.signed_duration_since(done) > max_age);
                if evictable {
                    self.inner.persister.delete(task.id);
                } else {
                    // kept visible until the sweeper evicts it from the table and the store
                    finished.push(task);
                }
                continue;
            }
            task.reset_interrupted();
            restored.push(task);
        }
        restored.sort_by_key(|task| task.created_at);
        finished.sort_by_key(|task| task.created_at);

        let (inserted, kept) = {
            let mut table = self.inner.table.lock();
            let inserted: Vec<Task> = restored
                .into_iter()
                .filter(|task| table.insert(task.clone()))
                .collect();
            let kept = finished
                .into_iter()
                .filter(|task| table.insert(task.clone()))
                .count();
            (inserted, kept)
        };
        for task in &inserted {
            self.inner.persister.save(task);
        }
        let expired = self.inner.expire_stale(now);

        if had_snapshot {
            if let Err(e) = store.clear_snapshot().await {
                warn!("Failed to clear queue snapshot: {}", e);
            }
        }

        info!(
            restored = inserted.len(),
            finished = kept,
            expired = expired,
            "Restored persisted tasks"
        );
    }

    /// Stop the workers and persist the final state.
    ///
    /// Waits up to `timeout` for running tasks to finish; loops still busy after
    /// that are aborted and their tasks go back to pending. The snapshot is only
    /// rewritten when the service was started. Calling this again does nothing.
    pub async fn shutdown(&self, timeout: Duration) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::ShutDown);
        let loops = match previous {
            Lifecycle::ShutDown => return,
            Lifecycle::Created => None,
            Lifecycle::Running(loops) => Some(loops),
        };

        info!("Queue service shutting down");
        self.inner.closed.store(true, Ordering::SeqCst);

        let started = loops.is_some();
        if let Some(loops) = loops {
            loops.token.cancel();
            let deadline = tokio::time::Instant::now() + timeout;
            let mut forced = 0;
            for mut handle in loops.workers.into_iter().chain(std::iter::once(loops.sweeper)) {
                if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                    handle.abort();
                    let _ = handle.await;
                    forced += 1;
                }
            }
            if forced > 0 {
                warn!(forced, "Loops did not stop in time and were aborted");
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);

        let reset = self.inner.reset_interrupted();
        if reset > 0 {
            warn!(reset, "Interrupted tasks returned to the queue");
        }

        self.inner.persister.flush().await;
        // a service that never started has not consumed the stored snapshot
        if !started {
            debug!("Queue never started; stored snapshot left in place");
        } else if let Some(store) = self.inner.persister.store() {
            let snapshot = QueueSnapshot::new(self.inner.stats.snapshot(), self.inner.unfinished_tasks());
            match store.save_snapshot(&snapshot).await {
                Ok(()) => debug!(tasks = snapshot.tasks.len(), "Queue snapshot written"),
                Err(e) => warn!("Failed to write queue snapshot: {}", e),
            }
        }

        info!("Queue service stopped");
    }

    /// Run a maintenance pass now instead of waiting for the sweeper.
    pub fn sweep_now(&self) -> SweepReport {
        sweep(&self.inner, Utc::now())
    }

    /// Current statistics.
    pub fn stats(&self) -> QueueStats {
        let mut status_counts: BTreeMap<String, usize> = TaskStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let mut priority_counts: BTreeMap<String, usize> = TaskPriority::ALL
            .iter()
            .map(|p| (p.as_str().to_string(), 0))
            .collect();
        let mut type_counts: BTreeMap<String, usize> = BTreeMap::new();

        let total_tasks = {
            let table = self.inner.table.lock();
            for task in table.tasks() {
                *status_counts.entry(task.status.as_str().to_string()).or_default() += 1;
                *priority_counts.entry(task.priority.as_str().to_string()).or_default() += 1;
                *type_counts.entry(task.task_type.clone()).or_default() += 1;
            }
            table.len()
        };

        let max_workers = self.inner.config.worker_count();
        QueueStats {
            totals: self.inner.stats.snapshot(),
            total_tasks,
            status_counts,
            priority_counts,
            type_counts,
            active_workers: max_workers.saturating_sub(self.inner.semaphore.available_permits()),
            max_workers,
            running: self.is_running(),
            handlers_registered: self.inner.registry.len(),
        }
    }
}

impl Drop for QueueService {
    fn drop(&mut self) {
        if let Lifecycle::Running(loops) = self.lifecycle.get_mut() {
            loops.token.cancel();
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
