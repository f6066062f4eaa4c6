//! TaskNotifier の実装
//!
//! - `ChannelNotifier`: push 型（kicker）。tokio mpsc に `Notification` を送る
//! - `NoopNotifier`: 何もしない（convergence の再通知だけに頼る構成）

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::Task;
use crate::ports::TaskNotifier;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Desired(Task),
    Completed(Task),
}

impl Notification {
    pub fn task(&self) -> &Task {
        match self {
            Notification::Desired(task) | Notification::Completed(task) => task,
        }
    }
}

/// Pushes notifications into unbounded channels, one for executors and one
/// for stagers.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    desired: mpsc::UnboundedSender<Notification>,
    completed: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new(
        desired: mpsc::UnboundedSender<Notification>,
        completed: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self { desired, completed }
    }

    /// Notifier with both directions fed into a single receiver.
    pub fn single() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx.clone(), tx), rx)
    }
}

#[async_trait]
impl TaskNotifier for ChannelNotifier {
    async fn notify_task_desired(&self, task: &Task) {
        if self.desired.send(Notification::Desired(task.clone())).is_err() {
            warn!(task = %task.guid, "kick desire dropped: no dispatcher listening");
        }
    }

    async fn notify_task_completed(&self, task: &Task) {
        if self.completed.send(Notification::Completed(task.clone())).is_err() {
            warn!(task = %task.guid, "kick complete dropped: no stager listening");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl TaskNotifier for NoopNotifier {
    async fn notify_task_desired(&self, _task: &Task) {}

    async fn notify_task_completed(&self, _task: &Task) {}
}
