//! Session - UI から見たオーケストレータの表面
//!
//! One `Session` lives from add-on activation to deactivation. It owns the
//! `TaskStore` and the `Scheduler`; the host calls `tick` from its timer and
//! the panel calls everything else.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::builder::{BuildError, SessionBuilder};
use super::config::OrchestratorConfig;
use super::scheduler::{Scheduler, TickReport};
use crate::domain::errors::{ImportError, SubmitError, TaskError, TransportError};
use crate::domain::events::TaskEvent;
use crate::domain::ids::TaskId;
use crate::domain::outcome::Balance;
use crate::domain::request::GenerationRequest;
use crate::domain::task::{Task, TaskSnapshot};
use crate::ports::{AssetSink, BroadcastEventSink, Clock, IdGenerator, Transport};
use crate::store::{StatusCounts, StoreError, TaskStore, snapshot};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid request: {0}")]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Rejected(TaskError),

    #[error("no task matches {0:?}")]
    UnknownTask(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("import not possible: {0}")]
    Import(#[from] ImportError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct Session {
    store: TaskStore,
    scheduler: Scheduler,
    transport: Arc<dyn Transport>,
    events: Arc<BroadcastEventSink>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    snapshot_path: Option<PathBuf>,
}

impl Session {
    pub(crate) fn new(
        store: TaskStore,
        scheduler: Scheduler,
        transport: Arc<dyn Transport>,
        events: Arc<BroadcastEventSink>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            scheduler,
            transport,
            events,
            clock,
            ids,
            snapshot_path,
        }
    }

    /// Build with defaults and queue the first balance refresh.
    pub fn activate(config: OrchestratorConfig) -> Result<Self, BuildError> {
        let mut session = SessionBuilder::new(config).build()?;
        session.refresh_balance();
        info!(restored = session.store.len(), "session activated");
        Ok(session)
    }

    /// Validate and enqueue. The first network call happens on the next tick.
    pub fn submit(&mut self, request: GenerationRequest) -> Result<TaskId, SessionError> {
        request.validate()?;
        self.scheduler
            .guard()
            .check_known(f64::from(request.estimated_cost()))
            .map_err(SessionError::Rejected)?;
        let id = self.ids.generate_task_id();
        let kind = request.kind();
        self.store.insert(Task::new(id, request, self.clock.now()))?;
        info!(task_id = %id, ?kind, "task created");
        Ok(id)
    }

    /// Returns `false` if the task had already finished.
    pub fn cancel(&mut self, id: TaskId) -> Result<bool, SessionError> {
        let now = self.clock.now();
        Ok(self.scheduler.cancel(&mut self.store, id, now)?)
    }

    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.store.list()
    }

    /// Match a local task id or a remote task id.
    pub fn search_by_id(&self, key: &str) -> Option<TaskSnapshot> {
        self.store.find(key.trim()).map(Task::snapshot)
    }

    pub fn task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.store.get(id).map(Task::snapshot)
    }

    pub fn counts(&self) -> StatusCounts {
        self.store.counts_by_status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Queue a (re-)import; runs on the next tick.
    pub fn request_import(&mut self, id: TaskId) -> Result<(), SessionError> {
        if self.store.get(id).is_none() {
            return Err(SessionError::UnknownTask(id.to_string()));
        }
        Ok(self.scheduler.request_import(&self.store, id)?)
    }

    /// Drop a finished task from the list.
    pub fn remove(&mut self, id: TaskId) -> Result<TaskSnapshot, SessionError> {
        Ok(self.store.remove(id)?.snapshot())
    }

    /// Last balance the service reported.
    pub fn balance(&self) -> Option<Balance> {
        self.scheduler.guard().last()
    }

    pub fn refresh_balance(&mut self) {
        self.scheduler.request_balance_refresh();
    }

    /// Fetch the balance right now. Doubles as an API key check.
    pub async fn fetch_balance(&mut self) -> Result<Balance, SessionError> {
        let balance = self.transport.get_balance().await?;
        self.scheduler.observe_balance(balance);
        Ok(balance)
    }

    pub fn tick(&mut self, sink: &mut dyn AssetSink) -> TickReport {
        let now = self.clock.now();
        self.scheduler.tick(&mut self.store, sink, now)
    }

    /// Wait for outstanding operations; their results apply on the next tick.
    pub async fn settle(&mut self) {
        self.scheduler.settle().await;
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Persist the task list, if a snapshot path is configured.
    pub fn save(&self) -> Result<(), StoreError> {
        match &self.snapshot_path {
            Some(path) => snapshot::save(&self.store, path),
            None => Ok(()),
        }
    }

    /// Tear down. Outstanding operations are abandoned; active tasks resume
    /// polling from the snapshot next time.
    pub fn deactivate(self) -> Result<(), StoreError> {
        let counts = self.store.counts_by_status();
        if let Err(e) = self.save() {
            warn!(error = %e, "could not persist tasks");
            return Err(e);
        }
        info!(active = counts.active(), total = counts.total(), "session deactivated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::RemoteTaskId;
    use crate::domain::outcome::{AssetFormat, PollReport, RemoteStatus, ResultHandle};
    use crate::domain::state::TaskStatus;
    use crate::impls::{RecordingSink, ScriptedTransport};
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    struct Fixture {
        session: Session,
        transport: Arc<ScriptedTransport>,
        clock: Arc<FixedClock>,
        sink: RecordingSink,
    }

    impl Fixture {
        fn new(config: OrchestratorConfig) -> Self {
            let transport = Arc::new(ScriptedTransport::new());
            let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()));
            let session = SessionBuilder::new(config)
                .transport(transport.clone())
                .clock(clock.clone())
                .id_generator(Arc::new(UlidGenerator::new(clock.clone())))
                .build()
                .unwrap();
            Self {
                session,
                transport,
                clock,
                sink: RecordingSink::default(),
            }
        }

        /// tick, let the spawned calls finish, advance the clock
        async fn step(&mut self) -> TickReport {
            let report = self.session.tick(&mut self.sink);
            self.session.settle().await;
            self.clock.advance(Duration::from_secs(2));
            report
        }

        /// step until `done` holds, at most 20 times
        async fn run_until(&mut self, done: impl Fn(&Session) -> bool) {
            for _ in 0..20 {
                if done(&self.session) {
                    return;
                }
                self.step().await;
            }
        }
    }

    #[tokio::test]
    async fn text_task_runs_to_imported() {
        let mut f = Fixture::new(OrchestratorConfig::default());
        let mut events = f.session.subscribe();
        f.transport.push_create(Ok(RemoteTaskId::new("T1")));
        f.transport.push_poll("T1", Ok(PollReport::in_progress(RemoteStatus::Running, 40)));
        f.transport.push_poll(
            "T1",
            Ok(PollReport::success(vec![ResultHandle::model("https://cdn/t1.glb", AssetFormat::Glb)])),
        );
        f.transport.asset("https://cdn/t1.glb", b"glTF".to_vec());

        let id = f.session.submit(GenerationRequest::text("a red chair")).unwrap();
        assert_eq!(f.session.task(id).unwrap().status, TaskStatus::Created);

        f.run_until(|s| s.task(id).is_some_and(|t| t.imported)).await;

        let snap = f.session.task(id).unwrap();
        assert_eq!(snap.status, TaskStatus::Succeeded);
        assert!(snap.imported);
        assert_eq!(f.sink.applied.len(), 1);
        assert_eq!(f.session.search_by_id("T1").map(|s| s.id), Some(id));
        assert_eq!(f.session.search_by_id(&id.to_string()).map(|s| s.id), Some(id));

        let mut seen_submitted = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TaskEvent::Submitted { .. }) {
                seen_submitted = true;
            }
        }
        assert!(seen_submitted);
    }

    #[tokio::test]
    async fn invalid_requests_never_enter_the_store() {
        let mut f = Fixture::new(OrchestratorConfig::default());
        let err = f.session.submit(GenerationRequest::text("   ")).unwrap_err();
        assert!(matches!(err, SessionError::Submit(SubmitError::EmptyPrompt)));
        assert!(f.session.list_tasks().is_empty());
    }

    #[tokio::test]
    async fn known_low_balance_rejects_submission() {
        let mut f = Fixture::new(OrchestratorConfig::default());
        f.transport.set_balance(5.0);
        assert_eq!(f.session.fetch_balance().await.unwrap().balance, 5.0);

        let err = f.session.submit(GenerationRequest::text("a lamp")).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Rejected(TaskError::InsufficientBalance { .. })
        ));
        assert!(f.session.list_tasks().is_empty());
    }

    #[tokio::test]
    async fn fetch_balance_surfaces_a_bad_key() {
        let mut f = Fixture::new(OrchestratorConfig::default());
        f.transport
            .push_balance(Err(TransportError::Unauthorized("invalid api key".into())));
        let err = f.session.fetch_balance().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Unauthorized(_))));
        assert!(f.session.balance().is_none());
    }

    #[tokio::test]
    async fn cancel_and_remove() {
        let mut f = Fixture::new(OrchestratorConfig::default());
        let a = f.session.submit(GenerationRequest::text("a")).unwrap();
        let b = f.session.submit(GenerationRequest::text("b")).unwrap();

        assert!(matches!(
            f.session.remove(a),
            Err(SessionError::Store(StoreError::StillActive(_)))
        ));
        assert!(f.session.cancel(a).unwrap());
        assert!(!f.session.cancel(a).unwrap());

        f.run_until(|s| s.task(b).is_some_and(|t| t.status == TaskStatus::Running))
            .await;
        assert_eq!(f.session.task(a).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(f.session.task(b).unwrap().status, TaskStatus::Running);

        let counts = f.session.counts();
        assert_eq!(counts.cancelled, 1);
        assert_eq!(counts.active(), 1);

        assert_eq!(f.session.remove(a).unwrap().id, a);
        assert_eq!(f.session.list_tasks().len(), 1);
    }

    #[tokio::test]
    async fn import_request_for_unknown_or_unfinished_task() {
        let mut f = Fixture::new(OrchestratorConfig::default());
        let id = f.session.submit(GenerationRequest::text("a")).unwrap();
        assert!(matches!(
            f.session.request_import(id),
            Err(SessionError::Import(ImportError::NoResults))
        ));
        f.session.cancel(id).unwrap();
        f.session.remove(id).unwrap();
        assert!(matches!(
            f.session.request_import(id),
            Err(SessionError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn deactivate_persists_and_active_tasks_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let config = OrchestratorConfig {
            snapshot_path: Some(path.clone()),
            ..OrchestratorConfig::default()
        };

        let mut f = Fixture::new(config.clone());
        f.transport.push_create(Ok(RemoteTaskId::new("T9")));
        let id = f.session.submit(GenerationRequest::text("a boat")).unwrap();
        f.run_until(|s| s.task(id).is_some_and(|t| t.remote_id.is_some()))
            .await;
        f.session.deactivate().unwrap();

        let mut g = Fixture::new(config);
        assert_eq!(g.session.task(id).unwrap().remote_id, Some(RemoteTaskId::new("T9")));
        g.transport.push_poll("T9", Ok(PollReport::in_progress(RemoteStatus::Running, 70)));
        g.run_until(|s| s.task(id).is_some_and(|t| t.progress == 70))
            .await;
        assert_eq!(g.session.task(id).unwrap().progress, 70);
        assert_eq!(g.transport.create_calls(), 0);
    }
}
