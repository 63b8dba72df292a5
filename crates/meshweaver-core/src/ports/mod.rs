//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部システム（生成 API、ホストの
//! シーン、UI）への境界を trait で定義し、実装の詳細を隠蔽します。

pub mod asset_sink;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod transport;

pub use self::asset_sink::{AssetSink, StagedAsset};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{BroadcastEventSink, EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::transport::Transport;
