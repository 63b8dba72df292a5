//! App - アプリケーション層
//!
//! ports を組み合わせてオーケストレーションを実装します。
//!
//! # 主要コンポーネント
//! - **SessionBuilder**: セッションの構築とワイヤリング
//! - **Session**: UI パネルから見た表面（submit / cancel / list / import）
//! - **Scheduler**: 協調的 tick（submit → poll → import）
//! - **BalanceGuard**: 残高スナップショットと曖昧な課金の照合
//! - **importer**: 結果のダウンロード、一時ファイル化、ホストへの適用

pub mod balance;
pub mod builder;
pub mod config;
pub mod importer;
pub mod scheduler;
pub mod session;

// 主要な型を再エクスポート
pub use self::balance::{BalanceGuard, Explained, Reconciliation};
pub use self::builder::{BuildError, SessionBuilder};
pub use self::config::{ConfigError, DEFAULT_BASE_URL, OrchestratorConfig};
pub use self::importer::{HandleOutcome, ImportReport};
pub use self::scheduler::{Op, Scheduler, SchedulerConfig, TickReport};
pub use self::session::{Session, SessionError};
