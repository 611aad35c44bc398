//! Background writer that keeps the store in step with the live table.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::TaskStore;
use crate::task::Task;

enum WriteOp {
    Save(Box<Task>),
    Delete(Uuid),
    Flush(oneshot::Sender<()>),
}

/// Queues store writes and applies them in order on a single background task.
///
/// Callers never wait on storage; failures are logged and dropped.
pub(crate) struct Persister {
    store: Option<Arc<dyn TaskStore>>,
    sender: mpsc::UnboundedSender<WriteOp>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<WriteOp>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Persister {
    pub(crate) fn new(store: Option<Arc<dyn TaskStore>>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            store,
            sender,
            receiver: Mutex::new(Some(receiver)),
            writer: Mutex::new(None),
        }
    }

    pub(crate) fn store(&self) -> Option<&Arc<dyn TaskStore>> {
        self.store.as_ref()
    }

    /// Queue a write of the full task record.
    pub(crate) fn save(&self, task: &Task) {
        if self.store.is_some() {
            let _ = self.sender.send(WriteOp::Save(Box::new(task.clone())));
        }
    }

    pub(crate) fn delete(&self, id: Uuid) {
        if self.store.is_some() {
            let _ = self.sender.send(WriteOp::Delete(id));
        }
    }

    /// Spawn the writer task if it is not running yet.
    ///
    /// Writes queued before this call are kept and applied first.
    pub(crate) fn ensure_writer(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let Some(receiver) = self.receiver.lock().take() else {
            return;
        };
        let handle = tokio::spawn(write_loop(store, receiver));
        *self.writer.lock() = Some(handle);
    }

    /// Wait until every write queued so far has been applied.
    pub(crate) async fn flush(&self) {
        if self.store.is_none() {
            return;
        }
        self.ensure_writer();

        let (tx, rx) = oneshot::channel();
        if self.sender.send(WriteOp::Flush(tx)).is_err() {
            return;
        }
        if rx.await.is_err() {
            warn!("Persistence writer stopped before flush completed");
        }
    }
}

async fn write_loop(store: Arc<dyn TaskStore>, mut receiver: mpsc::UnboundedReceiver<WriteOp>) {
    debug!("Persistence writer started");
    while let Some(op) = receiver.recv().await {
        match op {
            WriteOp::Save(task) => {
                if let Err(e) = store.save(&task).await {
                    warn!(task_id = %task.id, "Failed to persist task: {}", e);
                }
            }
            WriteOp::Delete(id) => {
                if let Err(e) = store.delete(&id).await {
                    warn!(task_id = %id, "Failed to delete persisted task: {}", e);
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Persistence writer stopped");
}

impl Drop for Persister {
    fn drop(&mut self) {
        if let Some(handle) = self.writer.get_mut().take() {
            handle.abort();
        }
    }
}
