//! Scheduler - 協調的ポーラー（host の tick で駆動）
//!
//! # 設計原則
//! - `tick` は同期。ネットワーク I/O は tokio task に逃がし、結果は次の tick で適用する
//! - 1 タスクにつき同時に 1 オペレーションまで（`in_flight`）
//! - 状態遷移を解釈するのはここだけ。Transport / Importer は分類済みの結果を返すだけ
//!
//! Completed operations report through an unbounded channel. A tick first
//! applies everything that arrived, then issues new operations for tasks that
//! are due, so a single tick may both observe a result and act on it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use super::balance::{self, BalanceGuard, Reconciliation};
use super::importer::{self, Fetched, ImportReport};
use crate::domain::errors::{ImportError, TaskError, TransportError};
use crate::domain::events::TaskEvent;
use crate::domain::ids::{RemoteTaskId, TaskId};
use crate::domain::outcome::{Balance, HandleRole, PollReport, RemoteStatus};
use crate::domain::request::GenerationRequest;
use crate::domain::state::TaskStatus;
use crate::domain::task::{Task, after};
use crate::ports::{AssetSink, EventSink, Transport};
use crate::store::{StoreError, TaskStore};
use crate::transport::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Gap between two polls of the same task.
    pub poll_interval: Duration,

    pub retry: RetryPolicy,

    /// Snapshot the balance before create and reconcile ambiguous failures.
    pub balance_guard: bool,

    /// Import results as soon as a task succeeds.
    pub auto_import: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            balance_guard: true,
            auto_import: true,
        }
    }
}

/// Kind of the one operation a task may have outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Submit,
    Reconcile,
    Poll,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Submit => "submit",
            Op::Reconcile => "reconcile",
            Op::Poll => "poll",
        }
    }
}

#[derive(Debug)]
enum SubmitFailure {
    /// Refused before create (insufficient balance).
    Rejected(TaskError),
    Transport {
        error: TransportError,
        create_attempted: bool,
    },
}

#[derive(Debug)]
struct SubmitResult {
    /// Balance read right before create, if the guard is on.
    observed: Option<Balance>,
    result: Result<RemoteTaskId, SubmitFailure>,
}

#[derive(Debug)]
enum Completion {
    Submit(TaskId, SubmitResult),
    Reconcile(TaskId, Result<Balance, TransportError>),
    Poll(TaskId, Result<PollReport, TransportError>),
    Import(TaskId, Vec<Fetched>),
    Balance(Result<Balance, TransportError>),
    RemoteCancel(TaskId, RemoteTaskId, Result<bool, TransportError>),
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Completions applied to the store.
    pub applied: usize,
    /// Operations started.
    pub issued: usize,
    /// Late results dropped because their task was already terminal or gone.
    pub discarded: usize,
    pub imports: Vec<ImportReport>,
}

pub struct Scheduler {
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    runtime: Handle,
    config: SchedulerConfig,
    guard: BalanceGuard,

    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    /// Spawned operations whose completion has not been received yet.
    outstanding: usize,
    /// Completions received by `settle`, applied on the next tick.
    settled: Vec<Completion>,

    in_flight: HashMap<TaskId, Op>,
    importing: HashSet<TaskId>,
    import_queue: Vec<TaskId>,
    balance_in_flight: bool,
    balance_wanted: bool,
}

impl Scheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
        runtime: Handle,
        config: SchedulerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = BalanceGuard::new(config.balance_guard);
        Self {
            transport,
            events,
            runtime,
            config,
            guard,
            tx,
            rx,
            outstanding: 0,
            settled: Vec::new(),
            in_flight: HashMap::new(),
            importing: HashSet::new(),
            import_queue: Vec::new(),
            balance_in_flight: false,
            balance_wanted: false,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn guard(&self) -> &BalanceGuard {
        &self.guard
    }

    /// The operation a task currently has outstanding.
    pub fn in_flight(&self, id: TaskId) -> Option<Op> {
        self.in_flight.get(&id).copied()
    }

    /// Nothing outstanding and nothing waiting to be applied.
    pub fn is_idle(&self) -> bool {
        self.outstanding == 0
            && self.settled.is_empty()
            && self.import_queue.is_empty()
            && !self.balance_wanted
    }

    /// Queue a (re-)import of a succeeded task's results.
    pub fn request_import(&mut self, store: &TaskStore, id: TaskId) -> Result<(), ImportError> {
        let task = store.get(id).ok_or(ImportError::NoResults)?;
        if task.status != TaskStatus::Succeeded || task.result_handles.is_empty() {
            return Err(ImportError::NoResults);
        }
        if !self.import_queue.contains(&id) {
            self.import_queue.push(id);
        }
        Ok(())
    }

    pub fn request_balance_refresh(&mut self) {
        self.balance_wanted = true;
    }

    /// Cancel a task. Returns `false` if it was already terminal.
    ///
    /// An outstanding operation is left to finish; its result is discarded.
    pub fn cancel(&mut self, store: &mut TaskStore, id: TaskId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let task = store.get_mut(id).ok_or(StoreError::UnknownTask(id))?;
        let from = task.status;
        if !task.mark_cancelled(now) {
            return Ok(false);
        }
        info!(task_id = %id, %from, "task cancelled");
        self.guard.abandon(id);
        self.status_changed(id, from, TaskStatus::Cancelled);
        self.import_queue.retain(|q| *q != id);
        if let Some(remote_id) = task.remote_id.clone() {
            self.spawn_remote_cancel(id, remote_id);
        }
        Ok(true)
    }

    /// One cooperative step. Never awaits.
    pub fn tick(&mut self, store: &mut TaskStore, sink: &mut dyn AssetSink, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let mut completions = std::mem::take(&mut self.settled);
        while let Ok(c) = self.rx.try_recv() {
            self.outstanding = self.outstanding.saturating_sub(1);
            completions.push(c);
        }
        for completion in completions {
            self.apply(completion, store, sink, now, &mut report);
        }

        for id in store.active_ids() {
            if self.in_flight.contains_key(&id) {
                continue;
            }
            let Some(task) = store.get(id) else { continue };
            if !task.is_due(now) {
                continue;
            }
            if let Some(op) = self.issue(task) {
                self.in_flight.insert(id, op);
                report.issued += 1;
            }
        }

        for id in std::mem::take(&mut self.import_queue) {
            if self.importing.contains(&id) {
                continue;
            }
            let Some(task) = store.get(id) else { continue };
            if task.status != TaskStatus::Succeeded {
                continue;
            }
            let transport = Arc::clone(&self.transport);
            let handles = task.result_handles.clone();
            let span = info_span!("import", task_id = %id, handles = handles.len());
            self.spawn(span, async move {
                Completion::Import(id, importer::fetch_all(transport, id, handles).await)
            });
            self.importing.insert(id);
            report.issued += 1;
        }

        if self.balance_wanted && !self.balance_in_flight {
            self.balance_wanted = false;
            self.balance_in_flight = true;
            let transport = Arc::clone(&self.transport);
            self.spawn(info_span!("balance"), async move {
                Completion::Balance(transport.get_balance().await)
            });
            report.issued += 1;
        }

        if report.applied > 0 || report.issued > 0 {
            debug!(
                applied = report.applied,
                issued = report.issued,
                discarded = report.discarded,
                "tick"
            );
        }
        report
    }

    /// Wait for every outstanding operation; results apply on the next tick.
    pub async fn settle(&mut self) {
        while self.outstanding > 0 {
            match self.rx.recv().await {
                Some(c) => {
                    self.outstanding -= 1;
                    self.settled.push(c);
                }
                None => break,
            }
        }
    }

    fn spawn<F>(&mut self, span: Span, fut: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.tx.clone();
        self.outstanding += 1;
        self.runtime.spawn(
            async move {
                // receiver lives as long as the scheduler
                let _ = tx.send(fut.await);
            }
            .instrument(span),
        );
    }

    fn spawn_remote_cancel(&mut self, id: TaskId, remote_id: RemoteTaskId) {
        let transport = Arc::clone(&self.transport);
        let span = info_span!("remote_cancel", task_id = %id, remote_id = %remote_id);
        self.spawn(span, async move {
            let result = transport.cancel(&remote_id).await;
            Completion::RemoteCancel(id, remote_id, result)
        });
    }

    fn issue(&mut self, task: &Task) -> Option<Op> {
        let id = task.id;
        let attempt = task.retry_count + 1;
        let transport = Arc::clone(&self.transport);
        let op = match task.phase() {
            TaskStatus::Created if task.needs_reconcile => Op::Reconcile,
            TaskStatus::Created => Op::Submit,
            TaskStatus::Pending | TaskStatus::Running => Op::Poll,
            _ => return None,
        };
        // a create and a reconcile read never overlap
        let blocking = match op {
            Op::Submit => Some(Op::Reconcile),
            Op::Reconcile => Some(Op::Submit),
            Op::Poll => None,
        };
        if blocking.is_some_and(|b| self.in_flight.values().any(|o| *o == b)) {
            debug!(task_id = %id, op = op.as_str(), "deferred");
            return None;
        }
        let span = info_span!("op", task_id = %id, op = op.as_str(), attempt);

        match op {
            Op::Submit => {
                self.guard
                    .create_started(id, f64::from(task.request.estimated_cost()));
                let request = task.request.clone();
                let guard = self.guard.is_enabled();
                self.spawn(span, async move {
                    Completion::Submit(id, submit(transport, request, guard).await)
                });
            }
            Op::Reconcile => {
                self.guard.reconcile_started(id);
                self.spawn(span, async move {
                    Completion::Reconcile(id, transport.get_balance().await)
                });
            }
            Op::Poll => {
                let Some(remote_id) = task.remote_id.clone() else {
                    error!(task_id = %id, "task past submission has no remote id");
                    return None;
                };
                self.spawn(span, async move {
                    Completion::Poll(id, transport.poll(&remote_id).await)
                });
            }
        }
        Some(op)
    }

    fn apply(
        &mut self,
        completion: Completion,
        store: &mut TaskStore,
        sink: &mut dyn AssetSink,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        match completion {
            Completion::Submit(id, result) => {
                self.in_flight.remove(&id);
                self.apply_submit(store, id, result, now, report);
            }
            Completion::Reconcile(id, result) => {
                self.in_flight.remove(&id);
                self.apply_reconcile(store, id, result, now, report);
            }
            Completion::Poll(id, result) => {
                self.in_flight.remove(&id);
                self.apply_poll(store, id, result, now, report);
            }
            Completion::Import(id, fetched) => {
                self.importing.remove(&id);
                self.apply_import(store, sink, id, fetched, now, report);
            }
            Completion::Balance(result) => {
                self.balance_in_flight = false;
                match result {
                    Ok(balance) => self.observe_balance(balance),
                    Err(error) => warn!(%error, "balance refresh failed"),
                }
                report.applied += 1;
            }
            Completion::RemoteCancel(id, remote_id, result) => match result {
                Ok(true) => info!(task_id = %id, %remote_id, "remote task cancelled"),
                Ok(false) => debug!(task_id = %id, %remote_id, "service does not support cancel"),
                Err(error) => warn!(task_id = %id, %remote_id, %error, "remote cancel failed"),
            },
        }
    }

    fn apply_submit(
        &mut self,
        store: &mut TaskStore,
        id: TaskId,
        submitted: SubmitResult,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        if let Some(balance) = submitted.observed {
            self.observe_balance(balance);
        }
        let charged = match &submitted.result {
            Ok(_) => Some(true),
            Err(SubmitFailure::Transport {
                error,
                create_attempted: true,
            }) if error.may_have_reached_remote() => None,
            Err(_) => Some(false),
        };
        self.guard.create_finished(id, charged);

        let Some(task) = store.get_mut(id) else {
            self.guard.abandon(id);
            report.discarded += 1;
            return;
        };

        if task.is_terminal() {
            self.guard.abandon(id);
            report.discarded += 1;
            if let Ok(remote_id) = submitted.result {
                warn!(task_id = %id, %remote_id, "remote task created after cancel");
                self.spawn_remote_cancel(id, remote_id);
            }
            return;
        }
        report.applied += 1;

        match submitted.result {
            Ok(remote_id) => {
                let from = task.status;
                if task.mark_submitted(remote_id.clone(), now) {
                    task.balance_snapshot = None;
                    task.next_poll_at = Some(after(now, self.config.poll_interval));
                    info!(task_id = %id, %remote_id, "task submitted");
                    self.events.emit(TaskEvent::Submitted { task_id: id, remote_id });
                    self.status_changed(id, from, TaskStatus::Pending);
                }
            }
            Err(SubmitFailure::Rejected(error)) => self.fail(task, error, now),
            Err(SubmitFailure::Transport {
                error,
                create_attempted,
            }) => {
                if create_attempted && error.may_have_reached_remote() {
                    match submitted.observed {
                        Some(before) => {
                            task.needs_reconcile = true;
                            task.balance_snapshot = Some(before.balance);
                            let retry_on = error.clone();
                            // reconciled even when the budget is spent
                            self.retry(task, TaskError::AmbiguousSubmission(error), &retry_on, now);
                        }
                        None => self.fail(task, TaskError::AmbiguousSubmission(error), now),
                    }
                } else {
                    self.transport_failure(task, error, now);
                }
            }
        }
    }

    fn apply_reconcile(
        &mut self,
        store: &mut TaskStore,
        id: TaskId,
        result: Result<Balance, TransportError>,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        if let Ok(balance) = &result {
            self.observe_balance(*balance);
        }
        let Some(task) = store.get_mut(id).filter(|t| !t.is_terminal()) else {
            self.guard.abandon(id);
            report.discarded += 1;
            return;
        };
        report.applied += 1;
        let cause = ambiguous_cause(task);

        let balance = match result {
            Ok(balance) => balance,
            Err(error) => {
                if error.is_transient() && !self.config.retry.is_exhausted(task.retry_count + 1) {
                    self.retry(task, TaskError::AmbiguousSubmission(cause), &error, now);
                } else {
                    warn!(task_id = %id, %error, "balance check after ambiguous create failed");
                    self.fail(task, TaskError::AmbiguousSubmission(cause), now);
                }
                return;
            }
        };

        let cost = f64::from(task.request.estimated_cost());
        match self.guard.reconcile(id, task.balance_snapshot, balance, cost) {
            Reconciliation::NotBilled => {
                task.clear_reconcile(now);
                let attempts = task.retry_count;
                if self.config.retry.is_exhausted(attempts) {
                    let last = Box::new(TaskError::AmbiguousSubmission(cause));
                    self.fail(task, TaskError::RetriesExhausted { attempts, last }, now);
                } else {
                    info!(task_id = %id, "ambiguous create was not billed; resubmitting");
                }
            }
            Reconciliation::Billed { before, after } => {
                self.fail(task, TaskError::CreditConsumedWithoutId { before, after }, now);
            }
            Reconciliation::Inconclusive { before, after } => {
                warn!(task_id = %id, before, after, "concurrent charges hide whether create was billed");
                self.fail(task, TaskError::AmbiguousSubmission(cause), now);
            }
            Reconciliation::Unknown => self.fail(task, TaskError::AmbiguousSubmission(cause), now),
        }
    }

    fn apply_poll(
        &mut self,
        store: &mut TaskStore,
        id: TaskId,
        result: Result<PollReport, TransportError>,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let Some(task) = store.get_mut(id).filter(|t| !t.is_terminal()) else {
            debug!(task_id = %id, "late poll result discarded");
            report.discarded += 1;
            return;
        };
        report.applied += 1;

        let poll = match result {
            Ok(poll) => poll,
            Err(error) => {
                self.transport_failure(task, error, now);
                return;
            }
        };

        match poll.status {
            s if s.is_in_progress() => {
                let (from, before) = (task.status, task.progress);
                task.record_progress(poll.progress, now);
                task.eta_secs = poll.eta_secs;
                task.next_poll_at = Some(after(now, self.poll_gap(poll.eta_secs)));
                if from != task.status {
                    self.status_changed(id, from, task.status);
                }
                if task.progress != before {
                    self.events.emit(TaskEvent::Progress {
                        task_id: id,
                        progress: task.progress,
                    });
                }
            }
            RemoteStatus::Success => {
                if !poll.result_handles.iter().any(|h| h.role == HandleRole::Model) {
                    self.fail(task, TaskError::MissingResult, now);
                    return;
                }
                let from = task.status;
                let handles = poll.result_handles.len();
                task.mark_succeeded(poll.result_handles, now);
                info!(task_id = %id, handles, "task succeeded");
                self.status_changed(id, from, TaskStatus::Succeeded);
                self.events.emit(TaskEvent::Succeeded { task_id: id, handles });
                if self.config.auto_import {
                    self.import_queue.push(id);
                }
                self.balance_wanted = true;
            }
            RemoteStatus::Cancelled => {
                let from = task.status;
                task.mark_cancelled(now);
                info!(task_id = %id, "task cancelled remotely");
                self.status_changed(id, from, TaskStatus::Cancelled);
            }
            status => {
                let message = poll.message.unwrap_or_default();
                self.fail(
                    task,
                    TaskError::RemoteFailure {
                        status: status.to_string(),
                        message,
                    },
                    now,
                );
            }
        }
    }

    fn apply_import(
        &mut self,
        store: &mut TaskStore,
        sink: &mut dyn AssetSink,
        id: TaskId,
        fetched: Vec<Fetched>,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let import = importer::apply(id, fetched, sink);
        report.applied += 1;

        for outcome in import.outcomes.iter().filter(|o| o.result.is_ok()) {
            self.events.emit(TaskEvent::Imported {
                task_id: id,
                role: outcome.handle.role,
            });
        }
        if let Some(task) = store.get_mut(id) {
            match import.failure_summary() {
                None => {
                    task.mark_imported(now);
                    info!(task_id = %id, assets = import.outcomes.len(), "results imported");
                }
                Some(reason) => {
                    warn!(task_id = %id, %reason, "import incomplete");
                    task.record_import_failure(reason.clone(), now);
                    self.events.emit(TaskEvent::ImportFailed { task_id: id, reason });
                }
            }
        }
        report.imports.push(import);
    }

    /// Half the remaining time the service estimates, never below the poll interval.
    fn poll_gap(&self, eta_secs: Option<u32>) -> Duration {
        let half_eta = eta_secs
            .map(|s| Duration::from_millis(u64::from(s) * 500))
            .unwrap_or_default();
        self.config.poll_interval.max(half_eta)
    }

    pub(crate) fn observe_balance(&mut self, balance: Balance) {
        self.guard.observe(balance);
        self.events.emit(TaskEvent::BalanceUpdated(balance));
    }

    fn transport_failure(&mut self, task: &mut Task, error: TransportError, now: DateTime<Utc>) {
        if error.is_transient() {
            let retry_on = error.clone();
            self.retry_or_fail(task, TaskError::Transport(error), &retry_on, now);
        } else {
            self.fail(task, TaskError::Transport(error), now);
        }
    }

    fn retry_or_fail(&mut self, task: &mut Task, error: TaskError, cause: &TransportError, now: DateTime<Utc>) {
        let attempts = task.retry_count + 1;
        if self.config.retry.is_exhausted(attempts) {
            self.fail(
                task,
                TaskError::RetriesExhausted {
                    attempts,
                    last: Box::new(error),
                },
                now,
            );
            return;
        }
        self.retry(task, error, cause, now);
    }

    /// Back off and try again, without looking at the budget.
    fn retry(&self, task: &mut Task, error: TaskError, cause: &TransportError, now: DateTime<Utc>) {
        let attempts = task.retry_count + 1;
        let delay = self.config.retry.delay_for(attempts, cause);
        let from = task.status;
        warn!(
            task_id = %task.id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            %error,
            "transient failure, retrying"
        );
        task.schedule_retry(error, delay, now);
        if from != TaskStatus::Retrying {
            self.status_changed(task.id, from, TaskStatus::Retrying);
        }
    }

    fn fail(&mut self, task: &mut Task, error: TaskError, now: DateTime<Utc>) {
        self.guard.abandon(task.id);
        let from = task.status;
        let reason = error.to_string();
        if task.mark_failed(error, now) {
            error!(task_id = %task.id, %reason, "task failed");
            self.status_changed(task.id, from, TaskStatus::Failed);
            self.events.emit(TaskEvent::Failed {
                task_id: task.id,
                reason,
            });
        }
    }

    fn status_changed(&self, id: TaskId, from: TaskStatus, to: TaskStatus) {
        self.events.emit(TaskEvent::StatusChanged { task_id: id, from, to });
    }
}

/// The error behind a pending reconcile.
fn ambiguous_cause(task: &Task) -> TransportError {
    match &task.error {
        Some(TaskError::AmbiguousSubmission(e)) => e.clone(),
        _ => TransportError::Protocol("create outcome unknown".into()),
    }
}

/// Balance snapshot, uploads, then create.
async fn submit(transport: Arc<dyn Transport>, request: GenerationRequest, guard: bool) -> SubmitResult {
    let mut observed = None;
    if guard {
        match transport.get_balance().await {
            Ok(balance) => {
                observed = Some(balance);
                if let Err(e) = balance::check(balance, f64::from(request.estimated_cost())) {
                    return SubmitResult {
                        observed,
                        result: Err(SubmitFailure::Rejected(e)),
                    };
                }
            }
            Err(error) => {
                return SubmitResult {
                    observed,
                    result: Err(SubmitFailure::Transport {
                        error,
                        create_attempted: false,
                    }),
                };
            }
        }
    }

    let mut uploads = HashMap::new();
    for path in request.local_images() {
        match transport.upload(path).await {
            Ok(token) => {
                uploads.insert(path.to_path_buf(), token);
            }
            Err(error) => {
                return SubmitResult {
                    observed,
                    result: Err(SubmitFailure::Transport {
                        error,
                        create_attempted: false,
                    }),
                };
            }
        }
    }

    let resolved = request.with_uploads(&uploads);
    let result = transport
        .create(&resolved)
        .await
        .map_err(|error| SubmitFailure::Transport {
            error,
            create_attempted: true,
        });
    SubmitResult { observed, result }
}
