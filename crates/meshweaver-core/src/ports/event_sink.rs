//! EventSink port - イベント通知の抽象化
//!
//! # 実装
//! - NoopEventSink: 何もしない
//! - BroadcastEventSink: tokio broadcast で UI に配信

use tokio::sync::broadcast;

use crate::domain::events::TaskEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: TaskEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: TaskEvent) {}
}

/// Fan-out to any number of subscribers. Slow subscribers lag, they never
/// block the tick.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<TaskEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: TaskEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}
