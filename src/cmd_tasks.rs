//! `demo`, `validate` and `tasks` subcommand handlers for TaskHive.

use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use taskhive_config::{Config, ConfigLoader, ConfigValidator};
use taskhive_queue::{Payload, QueueService, Task, TaskOptions, TaskPriority, TaskStatus};

use crate::server::{build_service, build_store, spawn_event_logger};

/// Handle `validate`: load the file strictly and print every finding.
pub(crate) fn validate_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load(path)?;
    let result = ConfigValidator::validate(&config);

    for error in &result.errors {
        println!("error:   {}: {}", error.path, error.message);
    }
    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }

    if !result.is_valid() {
        return Err(format!(
            "{} is invalid ({} errors)",
            path.display(),
            result.errors.len()
        )
        .into());
    }

    println!(
        "{} is valid ({} warnings)",
        path.display(),
        result.warnings.len()
    );
    Ok(())
}

/// Handle `tasks`: list records from the configured store.
pub(crate) async fn list_tasks(
    config: &Config,
    status: Option<TaskStatus>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = config.persistence.backend;
    if !backend.is_durable() {
        println!("The '{}' backend keeps no tasks between runs.", backend);
        return Ok(());
    }

    let Some(store) = build_store(&config.persistence).await? else {
        return Ok(());
    };

    let mut tasks: Vec<Task> = store
        .load_all()
        .await?
        .into_iter()
        .filter(|task| status.is_none_or(|s| task.status == s))
        .collect();
    tasks.sort_by_key(|task| task.created_at);

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&tasks)?;
            println!("{}", json);
        }
        _ => {
            println!(
                "{:<36} {:<16} {:<10} {:<9} {:<8} {}",
                "ID", "TYPE", "STATUS", "PRIORITY", "RETRIES", "ERROR"
            );
            println!("{}", "-".repeat(100));
            for task in &tasks {
                println!(
                    "{:<36} {:<16} {:<10} {:<9} {:<8} {}",
                    task.id,
                    task.task_type,
                    task.status,
                    task.priority,
                    format!("{}/{}", task.retry_count, task.max_retries),
                    task.error_message.as_deref().unwrap_or("-")
                );
            }
            println!("\n{} task(s)", tasks.len());
        }
    }

    Ok(())
}

/// Handle `demo`: enqueue a mix of built-in tasks, wait for them to settle and print stats.
pub(crate) async fn run_demo(
    mut config: Config,
    count: usize,
    wait: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    // keep flaky retries visible within the wait window
    if config.queue.retry_delay_secs > 1 {
        info!(
            configured = config.queue.retry_delay_secs,
            "Demo uses a 1s retry delay"
        );
        config.queue.retry_delay_secs = 1;
    }

    let service = build_service(&config).await?;
    let event_logger = spawn_event_logger(&service);
    service.start().await?;

    let mut ids = Vec::with_capacity(count);
    for index in 0..count {
        let (task_type, payload) = demo_task(index);
        let priority = TaskPriority::ALL[index % TaskPriority::ALL.len()];
        let options = TaskOptions::new().priority(priority).tag("demo");
        ids.push(service.enqueue(task_type, payload, options)?);
    }
    info!(count, "Enqueued demo tasks");

    if tokio::time::timeout(Duration::from_secs(wait), wait_until_settled(&service, &ids))
        .await
        .is_err()
    {
        warn!(wait_secs = wait, "Demo tasks did not settle in time");
    }

    let stats = service.stats();
    service.shutdown(Duration::from_secs(5)).await;
    event_logger.abort();

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn demo_task(index: usize) -> (&'static str, Payload) {
    let (task_type, value) = match index % 3 {
        0 => ("echo", json!({ "message": format!("demo task {}", index) })),
        1 => ("sleep", json!({ "millis": 50 + 25 * index as u64 })),
        _ => ("flaky", json!({ "fail_times": 1 })),
    };
    let payload = match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    };
    (task_type, payload)
}

async fn wait_until_settled(service: &QueueService, ids: &[Uuid]) {
    loop {
        let settled = ids.iter().all(|id| {
            service
                .get_task(id)
                .is_none_or(|task| task.status.is_final())
        });
        if settled {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
