//! StagerAgent - producer side
//!
//! Creates tasks and, once they complete, takes responsibility for the result:
//! `mark_resolving` → publish to `reply_to` → `resolve`.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::AgentError;
use crate::bbs::Bbs;
use crate::domain::Task;
use crate::ports::{IdGenerator, ResultPublisher};

#[derive(Clone)]
pub struct StagerAgent {
    bbs: Bbs,
    ids: Arc<dyn IdGenerator>,
    publisher: Arc<dyn ResultPublisher>,
}

impl StagerAgent {
    pub fn new(bbs: Bbs, ids: Arc<dyn IdGenerator>, publisher: Arc<dyn ResultPublisher>) -> Self {
        Self { bbs, ids, publisher }
    }

    /// Build a task with a fresh GUID and desire it.
    pub async fn desire(
        &self,
        stack: &str,
        memory_mb: u64,
        disk_mb: u64,
        actions: Vec<serde_json::Value>,
        reply_to: &str,
    ) -> Result<Task, AgentError> {
        let mut task = Task::new(self.ids.generate_task_guid(), stack, memory_mb, disk_mb, actions)
            .with_reply_to(reply_to);
        self.bbs.desire(&mut task).await?;
        Ok(task)
    }

    /// React to a completion notification.
    ///
    /// A conflict on `mark_resolving` means another stager got there first.
    /// A failed publish leaves the task `Resolving`; convergence hands it back
    /// once the resolving timeout has passed.
    #[instrument(skip_all, fields(task = %task.guid))]
    pub async fn handle_completed(&self, mut task: Task) -> Result<(), AgentError> {
        self.bbs.mark_resolving(&mut task).await?;

        if let Err(reason) = self.publisher.publish(&task.reply_to, &task).await {
            warn!(reason = %reason, reply_to = %task.reply_to, "publish failed");
            return Err(AgentError::Publish(reason));
        }

        self.bbs.resolve(&task).await?;
        info!(failed = task.failed, "task resolved");
        Ok(())
    }
}
