//! # TaskHive Queue
//!
//! In-process background task queue.
//!
//! ## Features
//!
//! - Priority dispatch with FIFO order inside a priority level
//! - Bounded worker pool with per-task timeouts and panic capture
//! - Fixed-delay retries
//! - Optional persistence (memory, JSON files or SQLite) with reload on start
//! - Periodic expiry of stale tasks and eviction of old finished ones
//! - Lifecycle event feed

pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod sqlite_store;
pub mod stats;
pub mod store;
pub mod task;

mod inner;
mod persistence;
mod sweeper;
mod table;
mod worker;

pub use config::QueueConfig;
pub use error::{QueueError, TaskError};
pub use events::{TaskEvent, TaskEventKind};
pub use handler::{HandlerRegistry, TaskHandler};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::Selector;
pub use service::QueueService;
pub use sqlite_store::SqliteTaskStore;
pub use stats::{QueueStats, StatsSnapshot};
pub use store::{FileTaskStore, MemoryTaskStore, QueueSnapshot, TaskStore};
pub use sweeper::SweepReport;
pub use task::{Payload, Task, TaskOptions, TaskPriority, TaskStatus};
