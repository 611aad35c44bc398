//! Task persistence store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::stats::StatsSnapshot;
use crate::task::Task;

/// Consolidated state written on shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub stats: StatsSnapshot,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl QueueSnapshot {
    pub fn new(stats: StatsSnapshot, tasks: Vec<Task>) -> Self {
        Self {
            timestamp: Utc::now(),
            stats,
            tasks,
        }
    }
}

/// Task store trait for persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Save (insert or replace) a task record.
    async fn save(&self, task: &Task) -> Result<(), QueueError>;

    /// Load a task by ID.
    async fn load(&self, id: &Uuid) -> Result<Option<Task>, QueueError>;

    /// Load every task record.
    async fn load_all(&self) -> Result<Vec<Task>, QueueError>;

    /// Delete a task. Deleting an unknown id is not an error.
    async fn delete(&self, id: &Uuid) -> Result<(), QueueError>;

    /// Replace the consolidated snapshot.
    async fn save_snapshot(&self, snapshot: &QueueSnapshot) -> Result<(), QueueError>;

    /// Load the consolidated snapshot, if one exists.
    async fn load_snapshot(&self) -> Result<Option<QueueSnapshot>, QueueError>;

    /// Remove the consolidated snapshot.
    async fn clear_snapshot(&self) -> Result<(), QueueError>;
}

/// In-memory task store for testing.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    snapshot: RwLock<Option<QueueSnapshot>>,
}

impl MemoryTaskStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored task records.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, task: &Task) -> Result<(), QueueError> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Task>, QueueError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<Task>, QueueError> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: &Uuid) -> Result<(), QueueError> {
        self.tasks.write().await.remove(id);
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &QueueSnapshot) -> Result<(), QueueError> {
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<QueueSnapshot>, QueueError> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn clear_snapshot(&self) -> Result<(), QueueError> {
        *self.snapshot.write().await = None;
        Ok(())
    }
}

/// File system based task store.
///
/// ```text
/// {storage_path}/
/// ├── snapshot.json
/// └── tasks/
///     └── {uuid}.json
/// ```
///
/// Files are written to a temporary sibling and renamed into place.
pub struct FileTaskStore {
    storage_path: PathBuf,
}

impl FileTaskStore {
    /// Create a new file-based task store, creating directories as needed.
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let storage_path = storage_path.into();
        fs::create_dir_all(storage_path.join("tasks"))
            .await
            .map_err(|e| {
                QueueError::Persistence(format!(
                    "Failed to create task directory under {:?}: {}",
                    storage_path, e
                ))
            })?;

        debug!("FileTaskStore initialized at {:?}", storage_path);
        Ok(Self { storage_path })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    fn tasks_dir(&self) -> PathBuf {
        self.storage_path.join("tasks")
    }

    fn task_path(&self, id: &Uuid) -> PathBuf {
        self.tasks_dir().join(format!("{}.json", id))
    }

    fn snapshot_path(&self) -> PathBuf {
        self.storage_path.join("snapshot.json")
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), QueueError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<String>, QueueError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_optional(path: &Path) -> Result<(), QueueError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn save(&self, task: &Task) -> Result<(), QueueError> {
        let content = serde_json::to_vec_pretty(task)?;
        write_atomic(&self.task_path(&task.id), &content).await?;
        debug!(task_id = %task.id, status = %task.status, "Saved task");
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Task>, QueueError> {
        match read_optional(&self.task_path(id)).await? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<Task>, QueueError> {
        let mut tasks = Vec::new();
        let mut entries = match fs::read_dir(self.tasks_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(tasks),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<Task>(&content) {
                    Ok(task) => tasks.push(task),
                    Err(e) => warn!("Failed to deserialize task from {:?}: {}", path, e),
                },
                Err(e) => warn!("Failed to read task file {:?}: {}", path, e),
            }
        }

        debug!("Loaded {} task records", tasks.len());
        Ok(tasks)
    }

    async fn delete(&self, id: &Uuid) -> Result<(), QueueError> {
        remove_optional(&self.task_path(id)).await?;
        debug!(task_id = %id, "Deleted task");
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &QueueSnapshot) -> Result<(), QueueError> {
        let content = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.snapshot_path(), &content).await?;
        debug!(tasks = snapshot.tasks.len(), "Saved queue snapshot");
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<QueueSnapshot>, QueueError> {
        match read_optional(&self.snapshot_path()).await? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    async fn clear_snapshot(&self) -> Result<(), QueueError> {
        remove_optional(&self.snapshot_path()).await
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
