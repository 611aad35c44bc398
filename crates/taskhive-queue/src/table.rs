//! Live task table shared by the service, workers and sweeper.

use std::collections::HashMap;

use uuid::Uuid;

use crate::task::Task;

struct Entry {
    /// Arrival order, used to break ties between equal creation times.
    seq: u64,
    task: Task,
}

/// In-memory map of every task the service currently tracks.
///
/// Always accessed under the service mutex; nothing here awaits.
#[derive(Default)]
pub(crate) struct TaskTable {
    entries: HashMap<Uuid, Entry>,
    next_seq: u64,
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a task. Returns false if the id is already tracked.
    pub(crate) fn insert(&mut self, task: Task) -> bool {
        if self.entries.contains_key(&task.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(task.id, Entry { seq, task });
        true
    }

    pub(crate) fn get(&self, id: &Uuid) -> Option<&Task> {
        self.entries.get(id).map(|e| &e.task)
    }

    pub(crate) fn get_mut(&mut self, id: &Uuid) -> Option<&mut Task> {
        self.entries.get_mut(id).map(|e| &mut e.task)
    }

    pub(crate) fn remove(&mut self, id: &Uuid) -> Option<Task> {
        self.entries.remove(id).map(|e| e.task)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Tasks paired with their arrival sequence.
    pub(crate) fn sequenced(&self) -> impl Iterator<Item = (u64, &Task)> {
        self.entries.values().map(|e| (e.seq, &e.task))
    }

    pub(crate) fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.entries.values().map(|e| &e.task)
    }

    pub(crate) fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.entries.values_mut().map(|e| &mut e.task)
    }

    /// Number of tasks that can still change state.
    pub(crate) fn unfinished(&self) -> usize {
        self.tasks().filter(|t| !t.status.is_final()).count()
    }
}
