//! シミュレーション用の TaskRunner / ResultPublisher
//!
//! The runner sleeps for random intervals instead of creating real
//! containers, the publisher forwards results into a channel.

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::Task;
use crate::ports::{ResultPublisher, RunOutcome, TaskRunner};

#[derive(Debug, Clone)]
pub struct SimulatedRunner {
    create_ms: Range<u64>,
    run_ms: Range<u64>,
}

impl SimulatedRunner {
    pub fn new(create_ms: Range<u64>, run_ms: Range<u64>) -> Self {
        Self { create_ms, run_ms }
    }

    /// Container creation and run finish immediately.
    pub fn instant() -> Self {
        Self::new(0..0, 0..0)
    }

    async fn sleep_in(range: &Range<u64>) {
        if range.is_empty() {
            return;
        }
        let ms = rand::thread_rng().gen_range(range.clone());
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

impl Default for SimulatedRunner {
    fn default() -> Self {
        Self::new(500..1000, 5000..5001)
    }
}

#[async_trait]
impl TaskRunner for SimulatedRunner {
    async fn create_container(&self, task: &Task) -> Result<String, String> {
        Self::sleep_in(&self.create_ms).await;
        Ok(format!("container-{}", task.guid))
    }

    async fn run(&self, task: &Task, container_handle: &str) -> RunOutcome {
        debug!(task = %task.guid, container = container_handle, "running");
        Self::sleep_in(&self.run_ms).await;
        RunOutcome::success("")
    }

    async fn destroy_container(&self, container_handle: &str) {
        debug!(container = container_handle, "destroying container");
    }
}

/// Forwards `(reply_to, task)` pairs into a channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<(String, Task)>,
}

impl ChannelPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(String, Task)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ResultPublisher for ChannelPublisher {
    async fn publish(&self, reply_to: &str, task: &Task) -> Result<(), String> {
        self.tx
            .send((reply_to.to_string(), task.clone()))
            .map_err(|_| "reply channel closed".to_string())
    }
}
