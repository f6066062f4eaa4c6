//! EventSink port - イベント記録の抽象化
//!
//! # 実装
//! - `TracingEventSink`: `tracing` へ構造化フィールドとして出力（デフォルト）
//! - `RecordingEventSink`: メモリに溜める（テスト用）

use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::domain::{BbsEvent, Severity};

/// EventSink はドメインイベントを記録
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BbsEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: BbsEvent) {
        let task = event.task.as_ref().map(|g| g.as_str()).unwrap_or_default();
        let state = event.state.map(|s| s.as_str()).unwrap_or_default();
        let executor = event.executor.as_ref().map(|e| e.as_str()).unwrap_or_default();
        let key = event.key.as_deref().unwrap_or_default();
        let error = event.error.as_deref().unwrap_or_default();
        let took_ms = event.took.map(|d| d.as_millis() as u64).unwrap_or_default();

        // tracing のレベルは const でなければならないので分岐する
        match event.severity {
            Severity::Debug => debug!(event = event.name, task, state, executor, key, error, took_ms),
            Severity::Info => info!(event = event.name, task, state, executor, key, error, took_ms),
            Severity::Warn => warn!(event = event.name, task, state, executor, key, error, took_ms),
            Severity::Error => error!(event = event.name, task, state, executor, key, error, took_ms),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<BbsEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BbsEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().into_iter().map(|e| e.name).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: BbsEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
