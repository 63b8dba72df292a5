//! Task Record Store - タスクの正本（source of truth）
//!
//! Owns every `Task`. Insertion order is kept for display. Only the scheduler
//! and the importer mutate records (`get_mut` is crate private), one task per
//! call.

pub mod snapshot;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ids::TaskId;
use crate::domain::state::TaskStatus;
use crate::domain::task::{Task, TaskSnapshot};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("task {0} already exists")]
    Duplicate(TaskId),

    #[error("task {0} is still active; cancel it first")]
    StillActive(TaskId),

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Number of tasks per status, for the management header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub created: usize,
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn active(&self) -> usize {
        self.created + self.pending + self.running + self.retrying
    }

    pub fn total(&self) -> usize {
        self.active() + self.succeeded + self.failed + self.cancelled
    }
}

#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) -> Result<(), StoreError> {
        if self.tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id));
        }
        self.order.push(task.id);
        self.tasks.insert(task.id, task);
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Look a task up by local id (with or without prefix) or remote id.
    pub fn find(&self, key: &str) -> Option<&Task> {
        let key = key.trim();
        if let Ok(id) = key.parse::<TaskId>()
            && let Some(task) = self.tasks.get(&id)
        {
            return Some(task);
        }
        self.iter()
            .find(|t| t.remote_id.as_ref().is_some_and(|r| r.as_str() == key))
    }

    /// Tasks in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.iter().map(Task::snapshot).collect()
    }

    pub fn active_ids(&self) -> Vec<TaskId> {
        self.iter().filter(|t| !t.is_terminal()).map(|t| t.id).collect()
    }

    /// Drop a finished task from the list.
    pub fn remove(&mut self, id: TaskId) -> Result<Task, StoreError> {
        let task = self.tasks.get(&id).ok_or(StoreError::UnknownTask(id))?;
        if !task.is_terminal() {
            return Err(StoreError::StillActive(id));
        }
        self.order.retain(|o| *o != id);
        self.tasks.remove(&id).ok_or(StoreError::UnknownTask(id))
    }

    pub fn counts_by_status(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.tasks.values() {
            let slot = match task.status {
                TaskStatus::Created => &mut counts.created,
                TaskStatus::Pending => &mut counts.pending,
                TaskStatus::Running => &mut counts.running,
                TaskStatus::Retrying => &mut counts.retrying,
                TaskStatus::Succeeded => &mut counts.succeeded,
                TaskStatus::Failed => &mut counts.failed,
                TaskStatus::Cancelled => &mut counts.cancelled,
            };
            *slot += 1;
        }
        counts
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
    use super::*;
    use crate::domain::ids::RemoteTaskId;
    use crate::domain::request::GenerationRequest;
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    fn task(prompt: &str) -> Task {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Task::new(TaskId::from_ulid(Ulid::new()), GenerationRequest::text(prompt), now)
    }

    #[test]
    fn keeps_submission_order() {
        let mut store = TaskStore::new();
        let a = task("a");
        let b = task("b");
        let (ida, idb) = (a.id, b.id);
        store.insert(b).unwrap();
        store.insert(a).unwrap();

        let ids: Vec<_> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![idb, ida]);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut store = TaskStore::new();
        let t = task("a");
        store.insert(t.clone()).unwrap();
        assert!(matches!(store.insert(t), Err(StoreError::Duplicate(_))));
    }

    #[test]
    fn find_by_local_or_remote_id() {
        let mut store = TaskStore::new();
        let mut t = task("a");
        t.mark_submitted(RemoteTaskId::new("remote-77"), t.created_at);
        let id = t.id;
        store.insert(t).unwrap();

        assert_eq!(store.find(&id.to_string()).map(|t| t.id), Some(id));
        assert_eq!(store.find(&id.as_ulid().to_string()).map(|t| t.id), Some(id));
        assert_eq!(store.find(" remote-77 ").map(|t| t.id), Some(id));
        assert!(store.find("nothing").is_none());
    }

    #[test]
    fn only_terminal_tasks_can_be_removed() {
        let mut store = TaskStore::new();
        let t = task("a");
        let id = t.id;
        let now = t.created_at;
        store.insert(t).unwrap();

        assert!(matches!(store.remove(id), Err(StoreError::StillActive(_))));
        store.get_mut(id).unwrap().mark_cancelled(now);
        assert!(store.remove(id).is_ok());
        assert!(store.is_empty());
        assert!(matches!(store.remove(id), Err(StoreError::UnknownTask(_))));
    }

    #[test]
    fn counts_follow_status() {
        let mut store = TaskStore::new();
        let a = task("a");
        let mut b = task("b");
        b.mark_cancelled(b.created_at);
        store.insert(a).unwrap();
        store.insert(b).unwrap();

        let counts = store.counts_by_status();
        assert_eq!(counts.created, 1);
        assert_eq!(counts.cancelled, 1);
        assert_eq!(counts.active(), 1);
        assert_eq!(counts.total(), 2);
        assert_eq!(store.active_ids().len(), 1);
    }
}
