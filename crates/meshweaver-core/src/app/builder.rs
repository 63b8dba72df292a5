//! SessionBuilder - セッションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 差し替え可能な部品（Transport, Clock, IdGenerator, TaskStore）

use std::sync::Arc;

use tokio::runtime::Handle;

use super::config::OrchestratorConfig;
use super::scheduler::Scheduler;
use super::session::Session;
use crate::ports::{BroadcastEventSink, Clock, IdGenerator, SystemClock, Transport, UlidGenerator};
use crate::store::{StoreError, TaskStore, snapshot};
use crate::transport::HttpTransport;

/// SessionBuilder は Session を構築
///
/// # 使用例
/// ```ignore
/// let session = SessionBuilder::new(OrchestratorConfig::from_env()?)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - Transport を渡さない場合は API キーが必須
/// - tokio ランタイムの外では build できない
/// - スナップショットが壊れていれば起動しない
pub struct SessionBuilder {
    config: OrchestratorConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    store: Option<TaskStore>,
    runtime: Option<Handle>,
}

/// BuildError はセッション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no API key configured (set MESHWEAVER_API_KEY)")]
    MissingApiKey,

    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("a tokio runtime is required to run network operations")]
    NoRuntime,

    #[error("could not restore tasks: {0}")]
    Store(#[from] StoreError),
}

impl SessionBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            transport: None,
            clock: None,
            ids: None,
            store: None,
            runtime: None,
        }
    }

    /// Use this transport instead of the HTTP client.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Start from this store instead of the configured snapshot.
    pub fn store(mut self, store: TaskStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Session, BuildError> {
        let runtime = match self.runtime {
            Some(h) => h,
            None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => {
                let api_key = self.config.api_key.clone().ok_or(BuildError::MissingApiKey)?;
                Arc::new(HttpTransport::new(
                    self.config.base_url.clone(),
                    api_key,
                    self.config.timeout,
                    self.config.download_timeout,
                )?)
            }
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let store = match (self.store, &self.config.snapshot_path) {
            (Some(store), _) => store,
            (None, Some(path)) => snapshot::load(path)?,
            (None, None) => TaskStore::new(),
        };

        let events = Arc::new(BroadcastEventSink::default());
        let scheduler = Scheduler::new(
            Arc::clone(&transport),
            events.clone(),
            runtime,
            self.config.scheduler.clone(),
        );
        Ok(Session::new(
            store,
            scheduler,
            transport,
            events,
            clock,
            ids,
            self.config.snapshot_path,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::ScriptedTransport;

    #[test]
    fn build_outside_a_runtime_fails_fast() {
        let result = SessionBuilder::new(OrchestratorConfig::default())
            .transport(Arc::new(ScriptedTransport::new()))
            .build();
        assert!(matches!(result, Err(BuildError::NoRuntime)));
    }

    #[tokio::test]
    async fn http_transport_needs_an_api_key() {
        let result = SessionBuilder::new(OrchestratorConfig::default()).build();
        assert!(matches!(result, Err(BuildError::MissingApiKey)));

        let config = OrchestratorConfig {
            api_key: Some("tsk_test".into()),
            ..OrchestratorConfig::default()
        };
        assert!(SessionBuilder::new(config).build().is_ok());
    }

    #[tokio::test]
    async fn corrupt_snapshot_stops_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = OrchestratorConfig {
            snapshot_path: Some(path),
            ..OrchestratorConfig::default()
        };
        let result = SessionBuilder::new(config)
            .transport(Arc::new(ScriptedTransport::new()))
            .build();
        assert!(matches!(result, Err(BuildError::Store(StoreError::Json(_)))));
    }
}
