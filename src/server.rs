//! Queue initialization and foreground run loop for TaskHive.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use taskhive_config::{Config, ConfigValidator, LoggingConfig, PersistenceConfig, StoreBackend};
use taskhive_queue::{
    FileTaskStore, MemoryTaskStore, QueueError, QueueService, SqliteTaskStore, TaskStore,
};

use crate::handlers::register_builtin_handlers;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize tracing with console output and, when `logging.dir` is set, a daily-rotated file.
///
/// `RUST_LOG` overrides the configured level.
pub(crate) fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.level.trim()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = if logging.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    let file_layer = match logging.resolved_dir() {
        Some(log_dir) => {
            std::fs::create_dir_all(&log_dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("taskhive")
                .filename_suffix("log")
                .max_log_files(30)
                .build(&log_dir)?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // dropping the guard stops the background writer
            let _ = LOG_GUARD.set(guard);

            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            Some(if logging.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            })
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Open the store selected by the persistence config.
pub(crate) async fn build_store(
    persistence: &PersistenceConfig,
) -> Result<Option<Arc<dyn TaskStore>>, QueueError> {
    let store: Arc<dyn TaskStore> = match persistence.backend {
        StoreBackend::None => return Ok(None),
        StoreBackend::Memory => Arc::new(MemoryTaskStore::new()),
        StoreBackend::File => Arc::new(FileTaskStore::new(persistence.resolved_path()).await?),
        StoreBackend::Sqlite => Arc::new(SqliteTaskStore::open(persistence.resolved_path()).await?),
    };
    Ok(Some(store))
}

/// Build a queue service with the configured store and the built-in handlers.
pub(crate) async fn build_service(config: &Config) -> Result<QueueService, QueueError> {
    let service = match build_store(&config.persistence).await? {
        Some(store) => {
            info!(
                backend = %config.persistence.backend,
                path = %config.persistence.resolved_path().display(),
                "Task persistence enabled"
            );
            QueueService::with_store(config.queue.clone(), store)
        }
        None => QueueService::new(config.queue.clone()),
    };
    register_builtin_handlers(&service);
    Ok(service)
}

/// Log every lifecycle event at debug level until the feed closes.
pub(crate) fn spawn_event_logger(service: &QueueService) -> JoinHandle<()> {
    let mut events = service.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(
                        task_id = %event.task_id,
                        task_type = %event.task_type,
                        kind = ?event.kind,
                        "Task event"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Run the queue in foreground until Ctrl-C.
pub(crate) async fn run_server(
    config: Config,
    shutdown_timeout: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting TaskHive v{}", env!("CARGO_PKG_VERSION"));

    for warning in ConfigValidator::validate(&config).into_result()? {
        warn!(field = %warning.path, "{}", warning.message);
    }

    let service = build_service(&config).await?;
    let event_logger = spawn_event_logger(&service);

    service.start().await?;
    info!(
        max_workers = config.queue.max_workers,
        task_types = ?service.task_types(),
        "Queue running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    service
        .shutdown(Duration::from_secs(shutdown_timeout))
        .await;
    event_logger.abort();

    let stats = service.stats();
    info!(
        completed = stats.totals.tasks_completed,
        failed = stats.totals.tasks_failed,
        retried = stats.totals.tasks_retried,
        "TaskHive stopped"
    );
    Ok(())
}
