use tracing::debug;

use crate::task::{Task, TaskId};

#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, snapshot: Vec<Task>) {
        debug!(count = snapshot.len(), "replacing task snapshot");
        self.tasks = snapshot;
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    pub fn upsert(&mut self, task: Task) {
        match self.tasks.iter().position(|existing| existing.id == task.id) {
            Some(idx) => self.tasks[idx] = task,
            None => self.tasks.push(task),
        }
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let idx = self.tasks.iter().position(|task| &task.id == id)?;
        Some(self.tasks.remove(idx))
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::TaskStore;
    use crate::task::{Task, TaskDraft, TaskId};

    fn task(id: &str, title: &str) -> Task {
        let created = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        TaskDraft::new(title)
            .expect("valid draft")
            .into_task(TaskId::new(id), created)
    }

    #[test]
    fn replace_is_wholesale() {
        let mut store = TaskStore::new();
        store.replace(vec![task("1", "one"), task("2", "two")]);
        assert_eq!(store.len(), 2);

        store.replace(vec![task("3", "three")]);
        assert_eq!(store.len(), 1);
        assert!(store.get(&TaskId::new("1")).is_none());
        assert!(store.get(&TaskId::new("3")).is_some());
    }

    #[test]
    fn upsert_updates_by_identity() {
        let mut store = TaskStore::new();
        store.upsert(task("1", "before"));
        store.upsert(task("1", "after"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&TaskId::new("1")).expect("present").title, "after");
    }

    #[test]
    fn remove_returns_the_task() {
        let mut store = TaskStore::new();
        store.upsert(task("1", "one"));

        let removed = store.remove(&TaskId::new("1")).expect("removed");
        assert_eq!(removed.title, "one");
        assert!(store.is_empty());
        assert!(store.remove(&TaskId::new("1")).is_none());
    }
}
