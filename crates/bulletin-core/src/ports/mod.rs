//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//!
//! # 設計原則
//! - 共有 KV store が source of truth（正本）
//! - 通知は best-effort（convergence が再通知する）
//! - 時刻は Clock から（決定的なテストのため）

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod notifier;
pub mod publisher;
pub mod runner;
pub mod store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, RecordingEventSink, TracingEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notifier::TaskNotifier;
pub use self::publisher::ResultPublisher;
pub use self::runner::{RunOutcome, TaskRunner};
pub use self::store::{LeaseHandle, LeaseSubscription, StoreAdapter, StoreError, StoreNode};
