//! meshweaver-core
//!
//! Client-side orchestration for a remote text/image-to-3D generation API.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, request, task, state, outcome, errors, events）
//! - **ports**: 抽象化レイヤー（Transport, AssetSink, EventSink, Clock, IdGenerator）
//! - **transport**: HTTP 実装とリトライ方針（retry, classify, wire, http）
//! - **store**: タスクの正本と JSON スナップショット
//! - **app**: アプリケーションロジック（session, builder, scheduler, importer, balance, config）
//! - **impls**: 実装（ScriptedTransport, RecordingSink, DirectorySink）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod store;
pub mod transport;

pub use app::{OrchestratorConfig, Session, SessionBuilder, SessionError, TickReport};
pub use domain::{GenerationRequest, TaskId, TaskStatus};
