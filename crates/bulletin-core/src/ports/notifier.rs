//! TaskNotifier port - executor / stager への通知
//!
//! After a successful `Desire` the executors must hear about the new task;
//! after a successful `Complete` the stagers must hear about the result.
//! Convergence re-announces both periodically, so delivery is best-effort.
//!
//! # 実装
//! - `impls::ChannelNotifier`: tokio mpsc への push（シミュレーション用）
//! - `impls::NoopNotifier`: 何もしない

use async_trait::async_trait;

use crate::domain::Task;

/// TaskNotifier は fire-and-forget の通知
///
/// # 設計原則
/// - 失敗しても registry の状態は壊れない（実装側でログして捨てる）
/// - 呼び出し側を長く待たせない
#[async_trait]
pub trait TaskNotifier: Send + Sync {
    /// A task is waiting to be claimed.
    async fn notify_task_desired(&self, task: &Task);

    /// A task has a result ready to be resolved.
    async fn notify_task_completed(&self, task: &Task);
}
