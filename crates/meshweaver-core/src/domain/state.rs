//! Task state machine states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a generation task.
///
/// State transitions:
/// - Created -> Pending -> Running -> Succeeded
/// - Created | Pending | Running -> Retrying -> (the state it came from)
/// - Retrying -> Failed (retry budget exhausted)
/// - any non-terminal -> Cancelled
///
/// Using an enum keeps matching exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Accepted locally, no remote id yet.
    Created,

    /// Remote task exists; not yet seen running.
    Pending,

    /// Remote task is queued or running.
    Running,

    /// Waiting out a backoff after a transient error.
    Retrying,

    Succeeded,

    Failed,

    Cancelled,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Is progress reported by the remote meaningful in this state?
    pub fn tracks_progress(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Retrying => "RETRYING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Retrying.is_terminal());
        assert!(!TaskStatus::Created.is_terminal());
    }

    #[test]
    fn status_serializes_as_screaming_case() {
        let s = serde_json::to_string(&TaskStatus::Retrying).unwrap();
        assert_eq!(s, "\"RETRYING\"");
        assert_eq!(TaskStatus::Running.to_string(), "RUNNING");
    }
}
