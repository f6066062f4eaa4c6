//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStore**: 単一プロセス用の KV store（TTL lease 付き）
//! - **ChannelNotifier / NoopNotifier**: TaskNotifier
//! - **SimulatedRunner / ChannelPublisher**: シミュレーション用
//!
//! 本番用の store（etcd など）は別クレートに配置する想定です。

pub mod memory_store;
pub mod notifier;
pub mod simulated;

pub use self::memory_store::InMemoryStore;
pub use self::notifier::{ChannelNotifier, NoopNotifier, Notification};
pub use self::simulated::{ChannelPublisher, SimulatedRunner};
