//! Producer-side operations: desire, mark resolving, resolve.

use tracing::{debug, instrument};

use super::Bbs;
use crate::domain::{BbsError, Task, TaskState};
use crate::ports::{StoreError, StoreNode};
use crate::schema::task_schema_path;

impl Bbs {
    /// Announce a task.
    ///
    /// `created_at` is stamped on first persistence only; the write is
    /// unconditional, so desiring the same GUID twice re-announces it.
    #[instrument(skip_all, fields(task = %task.guid))]
    pub async fn desire(&self, task: &mut Task) -> Result<(), BbsError> {
        let now = self.clock.now_nanos();

        let mut next = task.clone();
        if next.created_at == 0 {
            next.created_at = now;
        }
        next.state = TaskState::Pending;
        next.touch(now);

        let node = StoreNode::new(task_schema_path(&next.guid), next.to_json()?);
        self.retry
            .retry_on_timeout("desire", || self.store.set(node.clone()))
            .await
            .map_err(BbsError::StoreUnavailable)?;

        *task = next;
        debug!("task desired");
        self.notifier.notify_task_desired(task).await;
        Ok(())
    }

    /// `Completed -> Resolving`: this stager takes responsibility for the result.
    #[instrument(skip_all, fields(task = %task.guid))]
    pub async fn mark_resolving(&self, task: &mut Task) -> Result<(), BbsError> {
        self.transition(
            "mark_resolving",
            task,
            |t| t.state = TaskState::Resolving,
            BbsError::StaleWrite,
        )
        .await
    }

    /// Remove the task from the registry. Already gone counts as done.
    #[instrument(skip_all, fields(task = %task.guid))]
    pub async fn resolve(&self, task: &Task) -> Result<(), BbsError> {
        let keys = [task_schema_path(&task.guid)];
        match self
            .retry
            .retry_on_timeout("resolve", || self.store.delete(&keys))
            .await
        {
            Ok(()) | Err(StoreError::KeyNotFound) => Ok(()),
            Err(e) => Err(BbsError::StoreUnavailable(e)),
        }
    }
}
