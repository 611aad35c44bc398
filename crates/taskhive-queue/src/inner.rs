//! State shared by the service façade, the workers and the sweeper.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::TaskError;
use crate::events::{EventBus, TaskEventKind};
use crate::handler::HandlerRegistry;
use crate::persistence::Persister;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::scheduler::Selector;
use crate::stats::PoolStats;
use crate::store::TaskStore;
use crate::table::TaskTable;
use crate::task::{Payload, Task, TaskStatus};

/// How an attempt ended, as recorded on the task.
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed(Payload),
    Retrying(TaskError),
    Failed(TaskError),
}

pub(crate) struct QueueInner {
    pub(crate) config: QueueConfig,
    pub(crate) table: Mutex<TaskTable>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) selector: Selector,
    pub(crate) retry: RetryPolicy,
    pub(crate) stats: PoolStats,
    pub(crate) events: EventBus,
    pub(crate) persister: Persister,
    pub(crate) semaphore: Arc<Semaphore>,
    /// Worker loops are live.
    pub(crate) running: AtomicBool,
    /// Shutdown has begun; no new work is accepted.
    pub(crate) closed: AtomicBool,
}

impl QueueInner {
    pub(crate) fn new(config: QueueConfig, store: Option<Arc<dyn TaskStore>>) -> Self {
        Self {
            selector: Selector::new(config.task_max_age()),
            retry: RetryPolicy::new(config.retry_delay()),
            events: EventBus::new(config.event_capacity),
            semaphore: Arc::new(Semaphore::new(config.worker_count())),
            table: Mutex::new(TaskTable::new()),
            registry: HandlerRegistry::new(),
            stats: PoolStats::new(),
            persister: Persister::new(store),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Persist and announce a transition that already happened in the table.
    pub(crate) fn publish(&self, task: &Task, kind: TaskEventKind) {
        self.persister.save(task);
        self.events.emit(task, kind);
    }

    /// Claim the next eligible task for a worker.
    ///
    /// Nothing is claimed once shutdown has begun. Stale tasks are expired first so
    /// they can never be claimed. Transitions are published before the table lock
    /// is released so the store sees them in order.
    pub(crate) fn claim_next(&self) -> Option<Task> {
        if self.is_closed() {
            return None;
        }
        let now = Utc::now();
        let mut table = self.table.lock();
        let expired = self.selector.expire_stale(table.tasks_mut(), now);
        self.publish_expired(&expired);

        let next = self.selector.next_eligible(table.sequenced(), now, |task| {
            self.registry.contains(&task.task_type)
        })?;
        let task = table.get_mut(&next)?;
        task.mark_running(now);
        let task = task.clone();
        self.persister.save(&task);
        drop(table);

        debug!(task_id = %task.id, task_type = %task.task_type, "Claimed task");
        self.events.emit(&task, TaskEventKind::Started);
        Some(task)
    }

    /// Expire every stale queued task.
    pub(crate) fn expire_stale(&self, now: DateTime<Utc>) -> usize {
        let mut table = self.table.lock();
        let expired = self.selector.expire_stale(table.tasks_mut(), now);
        self.publish_expired(&expired);
        expired.len()
    }

    fn publish_expired(&self, expired: &[Task]) {
        for task in expired {
            warn!(
                task_id = %task.id,
                task_type = %task.task_type,
                "Task expired before it could run"
            );
            self.publish(task, TaskEventKind::Expired);
        }
    }

    /// Record the outcome of an attempt on a running task.
    ///
    /// Returns `None` when the task is no longer held as running, for instance
    /// after a forced shutdown put it back in the queue.
    pub(crate) fn finish(&self, id: Uuid, result: Result<Payload, TaskError>) -> Option<(Task, Outcome)> {
        let now = Utc::now();
        let mut table = self.table.lock();
        let task = table.get_mut(&id)?;
        if task.status != TaskStatus::Running {
            return None;
        }

        let (outcome, kind) = match result {
            Ok(result) => {
                task.mark_completed(result.clone(), now);
                self.stats.record_completed();
                (Outcome::Completed(result), TaskEventKind::Completed)
            }
            Err(error) => match self.retry.decide(task, now) {
                RetryDecision::RetryAt(retry_at) => {
                    task.schedule_retry(error.to_string(), retry_at);
                    self.stats.record_retried();
                    let attempt = task.retry_count;
                    (Outcome::Retrying(error), TaskEventKind::Retrying { attempt })
                }
                RetryDecision::Fail => {
                    task.mark_failed(error.to_string(), now);
                    self.stats.record_failed();
                    (Outcome::Failed(error), TaskEventKind::Failed)
                }
            },
        };
        let task = task.clone();
        self.publish(&task, kind);
        Some((task, outcome))
    }

    /// Put every running task back in the queue. Returns how many were reset.
    pub(crate) fn reset_interrupted(&self) -> usize {
        let mut table = self.table.lock();
        let mut reset = 0;
        for task in table.tasks_mut() {
            if task.status == TaskStatus::Running {
                task.reset_interrupted();
                self.persister.save(task);
                reset += 1;
            }
        }
        reset
    }

    /// Copies of every task that can still change state.
    pub(crate) fn unfinished_tasks(&self) -> Vec<Task> {
        let table = self.table.lock();
        let mut tasks: Vec<(u64, Task)> = table
            .sequenced()
            .filter(|(_, task)| !task.status.is_final())
            .map(|(seq, task)| (seq, task.clone()))
            .collect();
        tasks.sort_by_key(|(seq, _)| *seq);
        tasks.into_iter().map(|(_, task)| task).collect()
    }
}
