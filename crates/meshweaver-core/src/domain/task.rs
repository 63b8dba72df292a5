//! Task record: the request plus everything the orchestrator learned about it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TaskError;
use super::ids::{RemoteTaskId, TaskId};
use super::outcome::ResultHandle;
use super::request::{GenerationRequest, RequestSummary};
use super::state::TaskStatus;

/// `now + delay`, saturating instead of panicking on overflow.
pub fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// One generation job and its local tracking state.
///
/// Design:
/// - The `TaskStore` holds the only mutable copy.
/// - All state transitions happen through the methods below; each returns
///   whether it applied. Transitions out of a terminal state never apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Assigned by the service once create succeeds. Never replaced.
    pub remote_id: Option<RemoteTaskId>,

    pub request: GenerationRequest,

    pub status: TaskStatus,

    /// The state a `Retrying` task returns to.
    pub resume_status: Option<TaskStatus>,

    pub progress: u8,

    /// Seconds left according to the last poll.
    #[serde(default)]
    pub eta_secs: Option<u32>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Consecutive transient failures; reset by any successful call.
    pub retry_count: u32,

    /// Every retry this task ever went through (display only).
    pub total_retries: u32,

    /// Backoff gate.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Polling cadence gate.
    pub next_poll_at: Option<DateTime<Utc>>,

    pub result_handles: Vec<ResultHandle>,

    /// Last classified error.
    pub error: Option<TaskError>,

    pub imported: bool,

    /// Last import failure (display only, does not affect `status`).
    pub import_error: Option<String>,

    /// Balance right before the create call was issued.
    pub balance_snapshot: Option<f64>,

    /// A create call failed ambiguously and must be verified before resubmitting.
    pub needs_reconcile: bool,
}

impl Task {
    pub fn new(id: TaskId, request: GenerationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            remote_id: None,
            request,
            status: TaskStatus::Created,
            resume_status: None,
            progress: 0,
            eta_secs: None,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            total_retries: 0,
            next_retry_at: None,
            next_poll_at: None,
            result_handles: Vec::new(),
            error: None,
            imported: false,
            import_error: None,
            balance_snapshot: None,
            needs_reconcile: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The state that decides the next operation (`Retrying` looks through).
    pub fn phase(&self) -> TaskStatus {
        match self.status {
            TaskStatus::Retrying => self.resume_status.unwrap_or(TaskStatus::Created),
            s => s,
        }
    }

    /// Whether both the backoff and the polling gate have elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.is_none_or(|t| t <= now) && self.next_poll_at.is_none_or(|t| t <= now)
    }

    /// Created -> Pending. Refuses to replace an existing remote id.
    pub fn mark_submitted(&mut self, remote_id: RemoteTaskId, now: DateTime<Utc>) -> bool {
        if self.is_terminal() || self.remote_id.is_some() {
            return false;
        }
        self.remote_id = Some(remote_id);
        self.status = TaskStatus::Pending;
        self.clear_retry();
        self.needs_reconcile = false;
        self.updated_at = now;
        true
    }

    /// Poll says queued/running. Progress never goes backwards.
    pub fn record_progress(&mut self, progress: u8, now: DateTime<Utc>) -> bool {
        if self.is_terminal() || self.remote_id.is_none() {
            return false;
        }
        self.status = TaskStatus::Running;
        self.progress = self.progress.max(progress.min(100));
        self.clear_retry();
        self.updated_at = now;
        true
    }

    pub fn mark_succeeded(&mut self, handles: Vec<ResultHandle>, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Succeeded;
        self.progress = 100;
        self.eta_secs = None;
        self.result_handles = handles;
        self.clear_retry();
        self.next_poll_at = None;
        self.updated_at = now;
        true
    }

    /// Keeps the error for display.
    pub fn mark_failed(&mut self, error: TaskError, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.resume_status = None;
        self.eta_secs = None;
        self.error = Some(error);
        self.next_retry_at = None;
        self.next_poll_at = None;
        self.updated_at = now;
        true
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Cancelled;
        self.resume_status = None;
        self.eta_secs = None;
        self.next_retry_at = None;
        self.next_poll_at = None;
        self.updated_at = now;
        true
    }

    /// Enter (or stay in) `Retrying` until `now + delay`.
    pub fn schedule_retry(&mut self, error: TaskError, delay: Duration, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self.status != TaskStatus::Retrying {
            self.resume_status = Some(self.status);
        }
        self.status = TaskStatus::Retrying;
        self.retry_count += 1;
        self.total_retries += 1;
        self.error = Some(error);
        self.next_retry_at = Some(after(now, delay));
        self.updated_at = now;
        true
    }

    /// Verification showed the ambiguous create was not billed; resubmit next.
    pub fn clear_reconcile(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() || !self.needs_reconcile {
            return false;
        }
        self.needs_reconcile = false;
        self.balance_snapshot = None;
        self.next_retry_at = None;
        self.updated_at = now;
        true
    }

    pub fn mark_imported(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Succeeded {
            return false;
        }
        self.imported = true;
        self.import_error = None;
        self.updated_at = now;
        true
    }

    pub fn record_import_failure(&mut self, message: String, now: DateTime<Utc>) {
        self.import_error = Some(message);
        self.updated_at = now;
    }

    fn clear_retry(&mut self) {
        self.resume_status = None;
        self.retry_count = 0;
        self.next_retry_at = None;
        self.error = None;
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            remote_id: self.remote_id.clone(),
            request: self.request.summary(),
            status: self.status,
            progress: self.progress,
            eta_secs: self.eta_secs,
            created_at: self.created_at,
            updated_at: self.updated_at,
            retry_count: self.retry_count,
            total_retries: self.total_retries,
            next_retry_at: self.next_retry_at,
            result_handles: self.result_handles.clone(),
            error: self.error.as_ref().map(ToString::to_string),
            imported: self.imported,
            import_error: self.import_error.clone(),
        }
    }
}

/// Read-only view handed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub remote_id: Option<RemoteTaskId>,
    pub request: RequestSummary,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: u32,
    pub total_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub result_handles: Vec<ResultHandle>,
    pub error: Option<String>,
    pub imported: bool,
    pub import_error: Option<String>,
}
