//! Impls - ポートの実装（テスト・デモ用）
//!
//! The live HTTP transport lives in `transport::http`.

pub mod directory_sink;
pub mod recording_sink;
pub mod scripted_transport;

pub use self::directory_sink::DirectorySink;
pub use self::recording_sink::{AppliedAsset, RecordingSink};
pub use self::scripted_transport::{Call, ScriptedTransport};
