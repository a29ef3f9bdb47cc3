use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use super::task::Task;
use super::types::{TaskId, TaskRef, TaskStatus};
use crate::error::ExecutorError;

/// Shared, insertion-ordered task table.
///
/// Each task sits behind its own mutex so concurrently running tasks never
/// contend on one another. Callers must not hold two task guards at once and
/// must not hold a guard across an `.await`.
#[derive(Clone, Default)]
pub struct TaskTable {
    inner: Arc<TaskTableInner>,
}

#[derive(Default)]
struct TaskTableInner {
    index: RwLock<TaskIndex>,
    next_id: AtomicUsize,
    completion_seq: AtomicU64,
}

#[derive(Default)]
struct TaskIndex {
    by_id: BTreeMap<TaskId, Arc<Mutex<Task>>>,
    by_name: HashMap<String, TaskId>,
}

fn lock(slot: &Mutex<Task>) -> MutexGuard<'_, Task> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, TaskIndex> {
        match self.inner.index.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_index(&self) -> std::sync::RwLockWriteGuard<'_, TaskIndex> {
        match self.inner.index.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add a task, assigning the next id and a default `task_{id}` name.
    pub fn insert(&self, mut task: Task) -> Result<TaskId, ExecutorError> {
        let mut index = self.write_index();
        let id = self.inner.next_id.load(Ordering::SeqCst);
        if task.name.trim().is_empty() {
            task.name = format!("task_{id}");
        }
        if index.by_name.contains_key(&task.name) {
            return Err(ExecutorError::DuplicateTaskName(task.name));
        }
        self.inner.next_id.store(id + 1, Ordering::SeqCst);
        task.id = id;
        index.by_name.insert(task.name.clone(), id);
        index.by_id.insert(id, Arc::new(Mutex::new(task)));
        tracing::debug!(target: "agentflow.task", task_id = id, "task registered");
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.read_index().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.read_index().by_id.contains_key(&id)
    }

    /// All ids in insertion order.
    pub fn ids(&self) -> Vec<TaskId> {
        self.read_index().by_id.keys().copied().collect()
    }

    pub fn id_of(&self, name: &str) -> Option<TaskId> {
        self.read_index().by_name.get(name).copied()
    }

    pub fn resolve(&self, reference: &TaskRef) -> Option<TaskId> {
        match reference {
            TaskRef::Id(id) => self.contains(*id).then_some(*id),
            TaskRef::Name(name) => self.id_of(name),
        }
    }

    fn slot(&self, id: TaskId) -> Option<Arc<Mutex<Task>>> {
        self.read_index().by_id.get(&id).cloned()
    }

    /// Run `f` against the task under its lock.
    pub fn with_task<R>(&self, id: TaskId, f: impl FnOnce(&Task) -> R) -> Option<R> {
        let slot = self.slot(id)?;
        let guard = lock(&slot);
        Some(f(&guard))
    }

    pub fn with_task_mut<R>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let slot = self.slot(id)?;
        let mut guard = lock(&slot);
        Some(f(&mut guard))
    }

    /// Owned copy of a task.
    pub fn snapshot(&self, id: TaskId) -> Option<Task> {
        self.with_task(id, Task::clone)
    }

    pub fn snapshot_all(&self) -> Vec<Task> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.snapshot(id))
            .collect()
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.with_task(id, |t| t.status)
    }

    pub fn set_status(&self, id: TaskId, status: TaskStatus) -> bool {
        self.with_task_mut(id, |t| t.status = status).is_some()
    }

    pub fn name_of(&self, id: TaskId) -> Option<String> {
        self.with_task(id, |t| t.name.clone())
    }

    /// Mark a task completed and stamp it with the next completion sequence.
    pub fn mark_completed(&self, id: TaskId) -> bool {
        let seq = self.inner.completion_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.with_task_mut(id, |t| t.mark_completed(seq)).is_some()
    }
}

impl std::fmt::Debug for TaskTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTable")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_and_names_default() {
        let table = TaskTable::new();
        let a = table.insert(Task::builder("first").build()).unwrap();
        let b = table.insert(Task::builder("second").name("review").build()).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(table.name_of(a).as_deref(), Some("task_0"));
        assert_eq!(table.id_of("review"), Some(1));
        assert_eq!(table.ids(), vec![0, 1]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let table = TaskTable::new();
        table.insert(Task::builder("a").name("dup").build()).unwrap();
        let err = table
            .insert(Task::builder("b").name("dup").build())
            .unwrap_err();
        assert!(matches!(err, ExecutorError::DuplicateTaskName(n) if n == "dup"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn completion_sequence_is_monotonic() {
        let table = TaskTable::new();
        let a = table.insert(Task::builder("a").build()).unwrap();
        let b = table.insert(Task::builder("b").build()).unwrap();
        table.mark_completed(b);
        table.mark_completed(a);
        let seq_a = table.with_task(a, |t| t.completed_seq()).flatten();
        let seq_b = table.with_task(b, |t| t.completed_seq()).flatten();
        assert!(seq_a > seq_b);
        assert_eq!(table.status(a), Some(TaskStatus::Completed));
    }

    #[test]
    fn clones_share_state() {
        let table = TaskTable::new();
        let id = table.insert(Task::builder("a").build()).unwrap();
        let other = table.clone();
        other.set_status(id, TaskStatus::Failed);
        assert_eq!(table.status(id), Some(TaskStatus::Failed));
        assert!(table.resolve(&TaskRef::Id(7)).is_none());
    }
}
