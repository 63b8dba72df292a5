//! Events - タスクのライフサイクルイベント
//!
//! Emitted by the scheduler after a transition is applied, so a listener
//! never sees an event the store has not recorded yet.

use serde::{Deserialize, Serialize};

use super::ids::{RemoteTaskId, TaskId};
use super::outcome::{Balance, HandleRole};
use super::state::TaskStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Submitted {
        task_id: TaskId,
        remote_id: RemoteTaskId,
    },
    StatusChanged {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    Progress {
        task_id: TaskId,
        progress: u8,
    },
    Succeeded {
        task_id: TaskId,
        handles: usize,
    },
    Failed {
        task_id: TaskId,
        reason: String,
    },
    Imported {
        task_id: TaskId,
        role: HandleRole,
    },
    ImportFailed {
        task_id: TaskId,
        reason: String,
    },
    BalanceUpdated(Balance),
}

impl TaskEvent {
    /// The task this event is about (`None` for account level events).
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskEvent::Submitted { task_id, .. }
            | TaskEvent::StatusChanged { task_id, .. }
            | TaskEvent::Progress { task_id, .. }
            | TaskEvent::Succeeded { task_id, .. }
            | TaskEvent::Failed { task_id, .. }
            | TaskEvent::Imported { task_id, .. }
            | TaskEvent::ImportFailed { task_id, .. } => Some(*task_id),
            TaskEvent::BalanceUpdated(_) => None,
        }
    }
}
