//! SQLite task store.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::store::{QueueSnapshot, TaskStore};
use crate::task::Task;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    task_type TEXT NOT NULL,
    status TEXT NOT NULL,
    record TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

-- Single-row table holding the shutdown snapshot
CREATE TABLE IF NOT EXISTS snapshots (
    slot INTEGER PRIMARY KEY CHECK (slot = 0),
    taken_at TEXT NOT NULL,
    body TEXT NOT NULL
);
"#;

fn init_schema(conn: &rusqlite::Connection) -> Result<(), tokio_rusqlite::Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn db_error(e: tokio_rusqlite::Error) -> QueueError {
    QueueError::Persistence(e.to_string())
}

/// SQLite-backed task store.
///
/// Each task is one row holding its JSON record; the snapshot lives in a single-row table.
pub struct SqliteTaskStore {
    conn: Connection,
}

impl SqliteTaskStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().await.map_err(db_error)?;
        Self::init(conn).await
    }

    /// Open (or create) a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(&path).await.map_err(db_error)?;
        debug!("SqliteTaskStore opened at {:?}", path);
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, QueueError> {
        conn.call(|conn| init_schema(conn)).await.map_err(db_error)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn save(&self, task: &Task) -> Result<(), QueueError> {
        let record = serde_json::to_string(task)?;
        let id = task.id.to_string();
        let task_type = task.task_type.clone();
        let status = task.status.as_str();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, task_type, status, record) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        task_type = excluded.task_type,
                        status = excluded.status,
                        record = excluded.record",
                    params![id, task_type, status, record],
                )?;
                Ok(())
            })
            .await
            .map_err(db_error)
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Task>, QueueError> {
        let id = id.to_string();
        let record: Option<String> = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row("SELECT record FROM tasks WHERE id = ?1", [&id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(db_error)?;

        match record {
            Some(record) => Ok(Some(serde_json::from_str(&record)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<Task>, QueueError> {
        let records: Vec<(String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, record FROM tasks")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(db_error)?;

        let mut tasks = Vec::with_capacity(records.len());
        for (id, record) in records {
            match serde_json::from_str::<Task>(&record) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(task_id = %id, "Failed to deserialize task record: {}", e),
            }
        }
        Ok(tasks)
    }

    async fn delete(&self, id: &Uuid) -> Result<(), QueueError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM tasks WHERE id = ?1", [&id])?;
                Ok(())
            })
            .await
            .map_err(db_error)
    }

    async fn save_snapshot(&self, snapshot: &QueueSnapshot) -> Result<(), QueueError> {
        let body = serde_json::to_string(snapshot)?;
        let taken_at = snapshot.timestamp.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO snapshots (slot, taken_at, body) VALUES (0, ?1, ?2)",
                    params![taken_at, body],
                )?;
                Ok(())
            })
            .await
            .map_err(db_error)
    }

    async fn load_snapshot(&self) -> Result<Option<QueueSnapshot>, QueueError> {
        let body: Option<String> = self
            .conn
            .call(|conn| {
                let body = conn
                    .query_row("SELECT body FROM snapshots WHERE slot = 0", [], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(body)
            })
            .await
            .map_err(db_error)?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn clear_snapshot(&self) -> Result<(), QueueError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM snapshots", [])?;
                Ok(())
            })
            .await
            .map_err(db_error)
    }
}
