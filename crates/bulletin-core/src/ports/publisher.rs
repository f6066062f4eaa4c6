//! ResultPublisher port - stager が結果を `reply_to` へ届ける

use async_trait::async_trait;

use crate::domain::Task;

/// Delivers a completed task to whoever desired it (message bus, HTTP, ...).
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, reply_to: &str, task: &Task) -> Result<(), String>;
}
