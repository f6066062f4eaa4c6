//! Worker-side operations: claim, start, complete, plus the two leases a
//! worker keeps (its presence marker and, when elected, the converge lock).

use std::time::Duration;

use tracing::{debug, info, instrument};

use super::Bbs;
use crate::domain::{BbsError, BbsEvent, ExecutorId, Task, TaskState};
use crate::ports::{LeaseHandle, LeaseSubscription};
use crate::schema::{executor_schema_path, lock_schema_path, CONVERGE_LOCK_NAME};

impl Bbs {
    /// `Pending -> Claimed` by `executor_id`.
    ///
    /// Of any number of concurrent claims on the same snapshot at most one
    /// succeeds; the others get `AlreadyClaimed` and must bail.
    #[instrument(skip_all, fields(task = %task.guid, executor = %executor_id))]
    pub async fn claim(&self, task: &mut Task, executor_id: &ExecutorId) -> Result<(), BbsError> {
        self.transition(
            "claim",
            task,
            |t| {
                t.state = TaskState::Claimed;
                t.executor_id = executor_id.clone();
            },
            BbsError::AlreadyClaimed,
        )
        .await
    }

    /// `Claimed -> Running` inside `container_handle`.
    #[instrument(skip_all, fields(task = %task.guid))]
    pub async fn start(&self, task: &mut Task, container_handle: &str) -> Result<(), BbsError> {
        self.transition(
            "start",
            task,
            |t| {
                t.state = TaskState::Running;
                t.container_handle = container_handle.to_string();
            },
            BbsError::StaleWrite,
        )
        .await
    }

    /// `Running -> Completed` with the run's outcome, then notify stagers.
    ///
    /// A conflict here means convergence already gave up on this run; it is
    /// reported as an error event and returned.
    #[instrument(skip_all, fields(task = %task.guid, failed = failed))]
    pub async fn complete(
        &self,
        task: &mut Task,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<(), BbsError> {
        let res = self
            .transition(
                "complete",
                task,
                |t| {
                    t.state = TaskState::Completed;
                    t.failed = failed;
                    t.failure_reason = failure_reason.to_string();
                    t.result = result.to_string();
                },
                BbsError::StaleWrite,
            )
            .await;

        match res {
            Ok(()) => {
                self.notifier.notify_task_completed(task).await;
                Ok(())
            }
            Err(e) => {
                self.emit(
                    BbsEvent::error("runonce.complete.failed-to-compare-and-swap")
                        .with_task(task)
                        .with_error(&e),
                );
                Err(e)
            }
        }
    }

    /// Keep `/v2/executor/<id>` alive with a `heartbeat` TTL.
    pub async fn maintain_executor_presence(
        &self,
        heartbeat: Duration,
        executor_id: &ExecutorId,
    ) -> Result<(LeaseHandle, LeaseSubscription), BbsError> {
        let key = executor_schema_path(executor_id);
        debug!(key = %key, ttl_ms = heartbeat.as_millis() as u64, "maintaining presence");
        self.store
            .maintain_lease(&key, Vec::new(), heartbeat)
            .await
            .map_err(BbsError::StoreUnavailable)
    }

    /// Compete for `/v2/locks/<lock_name>`; the value is the holder identity.
    pub async fn maintain_lock(
        &self,
        lock_name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<(LeaseHandle, LeaseSubscription), BbsError> {
        let key = lock_schema_path(lock_name);
        info!(key = %key, holder, "competing for lock");
        self.store
            .maintain_lease(&key, holder.as_bytes().to_vec(), ttl)
            .await
            .map_err(BbsError::StoreUnavailable)
    }

    /// The converge lock is held for one convergence interval at a time.
    pub async fn maintain_converge_lock(
        &self,
        interval: Duration,
        holder: &str,
    ) -> Result<(LeaseHandle, LeaseSubscription), BbsError> {
        self.maintain_lock(CONVERGE_LOCK_NAME, holder, interval).await
    }
}
