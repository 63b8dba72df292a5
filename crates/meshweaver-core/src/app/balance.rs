//! Balance/Quota Guard - 課金の二重発生を防ぐ
//!
//! # 設計原則
//! - create の直前に残高を記録する
//! - create が曖昧に失敗したら、再送の前に残高を見直す
//! - 他のタスクの課金は台帳（ledger）で差し引く
//! - 説明のつかない減少があれば再送しない（二重課金より失敗を選ぶ）
//!
//! The ledger orders every create and reconcile by a sequence number taken on
//! the host thread. The balance snapshot of an ambiguous create was read
//! somewhere inside its own create window, and the reconcile read somewhere
//! inside the reconcile window. A charge by another task is *certain* to sit
//! between the two reads only if its create started after our create finished
//! and finished before our reconcile started. Anything overlapping either
//! window may or may not be part of the drop.

use crate::domain::errors::TaskError;
use crate::domain::ids::TaskId;
use crate::domain::outcome::Balance;

/// Differences smaller than this are rounding noise.
const EPSILON: f64 = 1e-6;

/// Share of a request's estimate an unexplained drop must reach to count as
/// that request's charge.
const BILLED_SHARE: f64 = 0.5;

/// Verdict on an ambiguous create.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    /// No unexplained drop: the remote task was not created. Safe to resubmit.
    NotBilled,
    /// Credit was consumed without a task id coming back.
    Billed { before: f64, after: f64 },
    /// Concurrent charges make the drop impossible to attribute.
    Inconclusive { before: f64, after: f64 },
    /// No snapshot to compare against.
    Unknown,
}

/// Charges by other tasks inside a reconcile window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Explained {
    /// Certainly between the snapshot and the reconcile read.
    pub certain: f64,
    /// Possibly between the two reads.
    pub uncertain: f64,
}

#[derive(Debug, Clone)]
struct CreateRecord {
    task_id: TaskId,
    cost: f64,
    issued: u64,
    done: Option<u64>,
    reconcile_issued: Option<u64>,
    /// `None` while unknown.
    charged: Option<bool>,
    /// Ambiguous and waiting for its own reconcile.
    awaiting: bool,
}

#[derive(Debug, Clone)]
pub struct BalanceGuard {
    enabled: bool,
    last: Option<Balance>,
    seq: u64,
    creates: Vec<CreateRecord>,
}

impl BalanceGuard {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last: None,
            seq: 0,
            creates: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Last balance seen from the service.
    pub fn last(&self) -> Option<Balance> {
        self.last
    }

    pub fn observe(&mut self, balance: Balance) {
        self.last = Some(balance);
    }

    /// Reject a request against the last known balance, if there is one.
    pub fn check_known(&self, required: f64) -> Result<(), TaskError> {
        match (self.enabled, self.last) {
            (true, Some(balance)) => check(balance, required),
            _ => Ok(()),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// A submit operation (which may end in a create) was issued.
    pub fn create_started(&mut self, task_id: TaskId, cost: f64) {
        let issued = self.next_seq();
        self.creates.push(CreateRecord {
            task_id,
            cost,
            issued,
            done: None,
            reconcile_issued: None,
            charged: None,
            awaiting: false,
        });
    }

    /// The submit operation came back. `charged` is `None` when the create
    /// may or may not have reached the service.
    pub fn create_finished(&mut self, task_id: TaskId, charged: Option<bool>) {
        let done = self.next_seq();
        if let Some(record) = self
            .creates
            .iter_mut()
            .rev()
            .find(|r| r.task_id == task_id && r.done.is_none())
        {
            record.done = Some(done);
            record.charged = charged;
            record.awaiting = charged.is_none();
        }
        self.prune();
    }

    pub fn reconcile_started(&mut self, task_id: TaskId) {
        let issued = self.next_seq();
        if let Some(record) = self.awaiting_mut(task_id) {
            record.reconcile_issued = Some(issued);
        }
    }

    /// Judge an ambiguous create of `task_id` against a fresh balance.
    ///
    /// A conclusive verdict closes the record; `Inconclusive` and `Unknown`
    /// leave the charge unknown for everyone else.
    pub fn reconcile(
        &mut self,
        task_id: TaskId,
        snapshot: Option<f64>,
        current: Balance,
        cost: f64,
    ) -> Reconciliation {
        let read_done = self.next_seq();
        let explained = self.explained(task_id, read_done);
        let verdict = reconcile(snapshot, current, explained, cost);
        if let Some(record) = self.awaiting_mut(task_id) {
            record.awaiting = false;
            record.charged = match verdict {
                Reconciliation::NotBilled => Some(false),
                Reconciliation::Billed { .. } => Some(true),
                _ => None,
            };
        }
        self.prune();
        verdict
    }

    /// The task stopped waiting for a reconcile (cancelled or failed).
    pub fn abandon(&mut self, task_id: TaskId) {
        if let Some(record) = self.awaiting_mut(task_id) {
            record.awaiting = false;
        }
        self.prune();
    }

    fn awaiting_mut(&mut self, task_id: TaskId) -> Option<&mut CreateRecord> {
        self.creates
            .iter_mut()
            .rev()
            .find(|r| r.task_id == task_id && r.awaiting)
    }

    /// Charges by other tasks between the snapshot and the reconcile read.
    fn explained(&self, task_id: TaskId, read_done: u64) -> Explained {
        let Some(own) = self
            .creates
            .iter()
            .rev()
            .find(|r| r.task_id == task_id && r.awaiting)
        else {
            return Explained::default();
        };
        let (Some(own_done), Some(read_issued)) = (own.done, own.reconcile_issued) else {
            return Explained::default();
        };

        let mut explained = Explained::default();
        for other in self.creates.iter().filter(|r| r.task_id != task_id) {
            let before_snapshot = other.done.is_some_and(|d| d <= own.issued);
            let after_read = other.issued >= read_done;
            if before_snapshot || after_read || other.charged == Some(false) {
                continue;
            }
            let inside = other.issued >= own_done && other.done.is_some_and(|d| d <= read_issued);
            if inside && other.charged == Some(true) {
                explained.certain += other.cost;
            } else {
                explained.uncertain += other.cost;
            }
        }
        explained
    }

    /// Drop records no open reconcile window can reach.
    fn prune(&mut self) {
        let horizon = self.creates.iter().filter(|r| r.awaiting).map(|r| r.issued).min();
        self.creates.retain(|r| match (r.done, horizon) {
            (None, _) => true,
            (Some(done), Some(h)) => done > h,
            (Some(_), None) => false,
        });
    }
}

/// Reject a request whose estimated cost exceeds `balance`.
pub fn check(balance: Balance, required: f64) -> Result<(), TaskError> {
    if required > balance.balance + EPSILON {
        return Err(TaskError::InsufficientBalance {
            available: balance.balance,
            required,
        });
    }
    Ok(())
}

/// Compare the pre-submit snapshot with a fresh balance, after taking out
/// what other tasks were charged in between.
pub fn reconcile(snapshot: Option<f64>, current: Balance, explained: Explained, cost: f64) -> Reconciliation {
    let Some(before) = snapshot else {
        return Reconciliation::Unknown;
    };
    let after = current.balance;
    let most = before - after - explained.certain;
    let least = most - explained.uncertain;
    let threshold = cost * BILLED_SHARE;

    if most < threshold - EPSILON {
        Reconciliation::NotBilled
    } else if least >= threshold - EPSILON {
        Reconciliation::Billed { before, after }
    } else {
        Reconciliation::Inconclusive { before, after }
    }
}
