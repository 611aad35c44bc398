//! End-to-end tests for the queue service.
//!
//! These drive the public API only: register handlers, enqueue, start, and
//! observe outcomes through queries, events and the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use taskhive_queue::{
    FileTaskStore, MemoryTaskStore, Payload, QueueConfig, QueueError, QueueService, Task,
    TaskError, TaskEventKind, TaskHandler, TaskOptions, TaskPriority, TaskStatus, TaskStore,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Records the `name` field of every payload it executes.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl TaskHandler for Recorder {
    async fn execute(&self, task: &Task) -> Result<Payload, TaskError> {
        let name = task
            .payload
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.seen.lock().push(name);

        let mut result = Payload::new();
        result.insert("ok".to_string(), json!(true));
        Ok(result)
    }
}

/// Fails every attempt and counts them.
#[derive(Default)]
struct Flaky {
    attempts: AtomicU32,
}

#[async_trait]
impl TaskHandler for Flaky {
    async fn execute(&self, _task: &Task) -> Result<Payload, TaskError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TaskError::handler("upstream unavailable"))
    }
}

struct Sleepy(Duration);

#[async_trait]
impl TaskHandler for Sleepy {
    async fn execute(&self, _task: &Task) -> Result<Payload, TaskError> {
        tokio::time::sleep(self.0).await;
        Ok(Payload::new())
    }
}

struct Explodes;

#[async_trait]
impl TaskHandler for Explodes {
    async fn execute(&self, _task: &Task) -> Result<Payload, TaskError> {
        panic!("kaboom");
    }
}

fn fast_config(max_workers: usize) -> QueueConfig {
    QueueConfig {
        max_workers,
        retry_delay_secs: 0,
        poll_interval_ms: 10,
        ..Default::default()
    }
}

fn named(name: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("name".to_string(), json!(name));
    payload
}

async fn wait_for_status(service: &QueueService, id: &Uuid, wanted: TaskStatus) -> Task {
    for _ in 0..500 {
        if let Some(task) = service.get_task(id) {
            if task.status == wanted {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {}", id, wanted);
}

// ============================================================================
// Scheduling scenarios
// ============================================================================

#[tokio::test]
async fn test_priority_dispatch_with_single_worker() {
    let service = QueueService::new(fast_config(1));
    let recorder = Arc::new(Recorder::default());
    service.register("record", recorder.clone());

    let mut ids = Vec::new();
    for (name, priority) in [
        ("low", TaskPriority::Low),
        ("critical", TaskPriority::Critical),
        ("medium", TaskPriority::Medium),
    ] {
        let id = service
            .enqueue("record", named(name), TaskOptions::new().priority(priority))
            .unwrap();
        ids.push(id);
    }

    service.start().await.unwrap();
    for id in &ids {
        wait_for_status(&service, id, TaskStatus::Completed).await;
    }
    service.shutdown(Duration::from_secs(1)).await;

    assert_eq!(*recorder.seen.lock(), vec!["critical", "medium", "low"]);
    let done = service.get_task(&ids[0]).unwrap();
    assert_eq!(done.result.unwrap()["ok"], json!(true));
}

#[tokio::test]
async fn test_retry_bound() {
    let service = QueueService::new(fast_config(2));
    let flaky = Arc::new(Flaky::default());
    service.register("flaky", flaky.clone());
    service.start().await.unwrap();

    let id = service
        .enqueue("flaky", Payload::new(), TaskOptions::new().max_retries(2))
        .unwrap();
    let task = wait_for_status(&service, &id, TaskStatus::Failed).await;
    service.shutdown(Duration::from_secs(1)).await;

    assert_eq!(task.retry_count, 2);
    assert_eq!(task.error_message.as_deref(), Some("upstream unavailable"));
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);

    let stats = service.stats();
    assert_eq!(stats.totals.tasks_failed, 1);
    assert_eq!(stats.totals.tasks_retried, 2);
}

#[tokio::test]
async fn test_delayed_task_waits() {
    let service = QueueService::new(fast_config(1));
    let recorder = Arc::new(Recorder::default());
    service.register("record", recorder.clone());
    service.start().await.unwrap();

    let id = service
        .enqueue("record", named("later"), TaskOptions::new().delay_secs(60))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let task = service.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(recorder.seen.lock().is_empty());
    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_cancelled_task_never_runs() {
    let service = QueueService::new(fast_config(1));
    let recorder = Arc::new(Recorder::default());
    service.register("record", recorder.clone());

    let cancelled = service
        .enqueue("record", named("cancelled"), TaskOptions::new())
        .unwrap();
    assert!(service.cancel(&cancelled));
    let kept = service
        .enqueue("record", named("kept"), TaskOptions::new())
        .unwrap();

    service.start().await.unwrap();
    wait_for_status(&service, &kept, TaskStatus::Completed).await;
    service.shutdown(Duration::from_secs(1)).await;

    assert_eq!(*recorder.seen.lock(), vec!["kept"]);
    assert_eq!(
        service.get_task(&cancelled).unwrap().status,
        TaskStatus::Cancelled
    );
}

#[tokio::test]
async fn test_unknown_task_type_stores_nothing() {
    let store = Arc::new(MemoryTaskStore::new());
    let service = QueueService::with_store(fast_config(1), store.clone());

    let err = service
        .enqueue("ghost", Payload::new(), TaskOptions::new())
        .unwrap_err();
    assert!(matches!(err, QueueError::UnknownTaskType(_)));

    service.shutdown(Duration::from_secs(1)).await;
    assert!(store.is_empty().await);
    assert!(store.load_snapshot().await.unwrap().unwrap().tasks.is_empty());
}

// ============================================================================
// Execution failures
// ============================================================================

#[tokio::test]
async fn test_timeout_fails_task() {
    let service = QueueService::new(fast_config(1));
    service.register("slow", Arc::new(Sleepy(Duration::from_secs(30))));
    service.start().await.unwrap();

    let id = service
        .enqueue(
            "slow",
            Payload::new(),
            TaskOptions::new().timeout_secs(1).max_retries(0),
        )
        .unwrap();
    let task = wait_for_status(&service, &id, TaskStatus::Failed).await;
    service.shutdown(Duration::from_secs(1)).await;

    assert_eq!(task.error_message.as_deref(), Some("Task timeout after 1s"));
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_the_pool() {
    let service = QueueService::new(fast_config(1));
    let recorder = Arc::new(Recorder::default());
    service.register("explode", Arc::new(Explodes));
    service.register("record", recorder.clone());
    service.start().await.unwrap();

    let bad = service
        .enqueue("explode", Payload::new(), TaskOptions::new().max_retries(1))
        .unwrap();
    let failed = wait_for_status(&service, &bad, TaskStatus::Failed).await;
    assert_eq!(failed.retry_count, 1);
    assert!(failed.error_message.unwrap().contains("kaboom"));

    let good = service
        .enqueue("record", named("after"), TaskOptions::new())
        .unwrap();
    wait_for_status(&service, &good, TaskStatus::Completed).await;
    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_running_task_cannot_be_cancelled() {
    let service = QueueService::new(fast_config(1));
    service.register("slow", Arc::new(Sleepy(Duration::from_millis(300))));
    service.start().await.unwrap();

    let id = service
        .enqueue("slow", Payload::new(), TaskOptions::new())
        .unwrap();
    wait_for_status(&service, &id, TaskStatus::Running).await;
    assert!(!service.cancel(&id));

    wait_for_status(&service, &id, TaskStatus::Completed).await;
    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_events_report_completion() {
    let service = QueueService::new(fast_config(1));
    service.register("record", Arc::new(Recorder::default()));
    let mut events = service.subscribe();
    service.start().await.unwrap();

    let id = service
        .enqueue("record", named("evented"), TaskOptions::new())
        .unwrap();
    let mut kinds = Vec::new();
    while kinds.last() != Some(&TaskEventKind::Completed) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.task_id, id);
        kinds.push(event.kind);
    }
    service.shutdown(Duration::from_secs(1)).await;

    assert_eq!(
        kinds,
        vec![
            TaskEventKind::Enqueued,
            TaskEventKind::Started,
            TaskEventKind::Completed
        ]
    );
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_reload_resets_running_and_expires_stale() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileTaskStore::new(temp_dir.path()).await.unwrap());

    let mut interrupted = Task::new("later", named("interrupted"));
    interrupted.status = TaskStatus::Running;
    interrupted.started_at = Some(Utc::now());
    let mut stale = Task::new("later", named("stale"));
    stale.created_at = Utc::now() - chrono::Duration::hours(30);
    let mut finished = Task::new("later", named("finished"));
    finished.status = TaskStatus::Completed;
    finished.completed_at = Some(Utc::now() - chrono::Duration::hours(48));
    for task in [&interrupted, &stale, &finished] {
        store.save(task).await.unwrap();
    }

    // no handler for "later", so reloaded tasks stay queued
    let service = QueueService::with_store(fast_config(1), store.clone());
    service.start().await.unwrap();

    let reloaded = service.get_task(&interrupted.id).unwrap();
    assert_eq!(reloaded.status, TaskStatus::Pending);
    assert!(reloaded.started_at.is_none());
    assert_eq!(
        service.get_task(&stale.id).unwrap().status,
        TaskStatus::Expired
    );
    assert!(service.get_task(&finished.id).is_none());

    service.shutdown(Duration::from_secs(1)).await;

    let record = store.load(&interrupted.id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(
        store.load(&stale.id).await.unwrap().unwrap().status,
        TaskStatus::Expired
    );
    assert!(store.load(&finished.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_snapshot_round_trip_across_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let store: Arc<dyn TaskStore> = Arc::new(FileTaskStore::new(temp_dir.path()).await.unwrap());

    let first = QueueService::with_store(fast_config(1), store.clone());
    first.register("record", Arc::new(Recorder::default()));
    first.start().await.unwrap();
    let done = first
        .enqueue("record", named("done"), TaskOptions::new())
        .unwrap();
    wait_for_status(&first, &done, TaskStatus::Completed).await;
    let waiting = first
        .enqueue("record", named("waiting"), TaskOptions::new().delay_secs(3600))
        .unwrap();
    first.shutdown(Duration::from_secs(1)).await;

    let snapshot = store.load_snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.stats.tasks_completed, 1);
    assert_eq!(
        snapshot.tasks.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![waiting]
    );

    let second = QueueService::with_store(fast_config(1), store.clone());
    second.register("record", Arc::new(Recorder::default()));
    second.start().await.unwrap();

    assert_eq!(
        second.get_task(&waiting).unwrap().status,
        TaskStatus::Pending
    );
    // recently finished work stays visible until the sweeper evicts it
    assert_eq!(
        second.get_task(&done).unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(second.stats().totals.tasks_completed, 1);
    assert!(store.load_snapshot().await.unwrap().is_none());

    second.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_forced_shutdown_requeues_running_task() {
    let store = Arc::new(MemoryTaskStore::new());
    let service = QueueService::with_store(fast_config(1), store.clone());
    service.register("slow", Arc::new(Sleepy(Duration::from_secs(30))));
    service.start().await.unwrap();

    let id = service
        .enqueue("slow", Payload::new(), TaskOptions::new())
        .unwrap();
    wait_for_status(&service, &id, TaskStatus::Running).await;
    service.shutdown(Duration::from_millis(100)).await;

    let task = service.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.started_at.is_none());

    let snapshot = store.load_snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.tasks.len(), 1);
    assert_eq!(snapshot.tasks[0].status, TaskStatus::Pending);
    assert_eq!(
        store.load(&id).await.unwrap().unwrap().status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn test_shutdown_stops_new_claims() {
    for _ in 0..5 {
        let service = QueueService::new(fast_config(1));
        service.register("slow", Arc::new(Sleepy(Duration::from_millis(30))));
        service.start().await.unwrap();

        let ids: Vec<Uuid> = (0..10)
            .map(|_| {
                service
                    .enqueue("slow", Payload::new(), TaskOptions::new())
                    .unwrap()
            })
            .collect();
        while service.list_tasks(Some(TaskStatus::Running)).is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let claimed: Vec<Uuid> = ids
            .iter()
            .copied()
            .filter(|id| service.get_task(id).unwrap().status != TaskStatus::Pending)
            .collect();
        service.shutdown(Duration::from_secs(10)).await;

        // only attempts claimed before shutdown began may have run
        for id in &ids {
            let task = service.get_task(id).unwrap();
            if claimed.contains(id) {
                assert_eq!(task.status, TaskStatus::Completed);
            } else {
                assert_eq!(task.status, TaskStatus::Pending);
                assert!(task.started_at.is_none());
            }
        }
        assert!(claimed.len() < ids.len());
        assert_eq!(
            service.stats().totals.tasks_processed,
            claimed.len() as u64
        );
    }
}
