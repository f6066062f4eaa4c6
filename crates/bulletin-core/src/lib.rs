//! bulletin-core
//!
//! Coordination core of a compute fleet: stagers desire tasks, executors
//! claim and run them, and a shared replicated key-value store is the only
//! source of truth. Every process may crash at any time; convergence repairs
//! whatever they leave behind.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, errors, events）
//! - **ports**: 抽象化レイヤー（StoreAdapter, Clock, TaskNotifier, EventSink, など）
//! - **schema**: store 上のキー配置
//! - **bbs**: タスク遷移、presence、converge lock、収束パス
//! - **app**: エージェントとループ（executor, stager, converger, builder）
//! - **impls**: 実装（InMemoryStore、通知、シミュレーション用）
//! - **config**: 設定

pub mod app;
pub mod bbs;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod schema;

pub use crate::bbs::{Bbs, ConvergeConfig, ConvergeReport, RetryPolicy};
pub use crate::config::{BulletinConfig, ConfigError};
