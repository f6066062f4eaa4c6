//! BBS - 共有 store 上のタスク掲示板
//!
//! Every process of the fleet talks to the registry through a [`Bbs`]. It owns
//! no state of its own: the store is the source of truth and every decision
//! is re-read from it.
//!
//! # 構成
//! - **stager**: `desire` / `mark_resolving` / `resolve`
//! - **executor**: `claim` / `start` / `complete`, presence と converge lock
//! - **converge**: 収束（整合性回復）パス
//! - **retry**: store timeout の再試行ポリシー

pub mod converge;
pub mod executor;
pub mod retry;
pub mod stager;

use std::sync::Arc;

use tracing::{trace, warn};

use crate::domain::{BbsError, BbsEvent, ExecutorId, Task, TaskGuid, TaskState};
use crate::ports::{Clock, EventSink, StoreAdapter, StoreError, TaskNotifier};
use crate::schema::{task_schema_path, EXECUTOR_SCHEMA_ROOT, TASK_SCHEMA_ROOT};

pub use self::converge::{ConvergeConfig, ConvergeReport};
pub use self::retry::RetryPolicy;

/// Handle to the task registry.
///
/// Cheap to clone; clones share the same collaborators.
#[derive(Clone)]
pub struct Bbs {
    store: Arc<dyn StoreAdapter>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn TaskNotifier>,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
}

impl Bbs {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn TaskNotifier>,
        events: Arc<dyn EventSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            events,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn StoreAdapter> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn emit(&self, event: BbsEvent) {
        self.events.emit(event);
    }

    /// CAS テンプレート
    ///
    /// 1. the caller's current encoding is the expected value
    /// 2. a copy is mutated and touched with the clock
    /// 3. compare-and-swap, retrying store timeouts
    /// 4. the caller's task is replaced only when the write landed
    ///
    /// A CAS mismatch (or a vanished key) becomes the error built by `conflict`.
    async fn transition<F>(
        &self,
        op: &'static str,
        task: &mut Task,
        mutate: F,
        conflict: fn(TaskGuid) -> BbsError,
    ) -> Result<(), BbsError>
    where
        F: FnOnce(&mut Task),
    {
        let key = task_schema_path(&task.guid);
        let expected = task.to_json()?;

        let mut next = task.clone();
        mutate(&mut next);
        next.touch(self.clock.now_nanos());
        let value = next.to_json()?;

        let res = self
            .retry
            .retry_on_timeout(op, || {
                self.store
                    .compare_and_swap(&key, &expected, value.clone())
            })
            .await;

        match res {
            Ok(()) => {
                trace!(op, task = %next.guid, state = %next.state, "transition applied");
                *task = next;
                Ok(())
            }
            Err(StoreError::CompareFailed | StoreError::KeyNotFound) => Err(conflict(task.guid.clone())),
            Err(other) => Err(BbsError::StoreUnavailable(other)),
        }
    }

    /// Current record of a task, `None` once it has been resolved.
    pub async fn get_task(&self, guid: &TaskGuid) -> Result<Option<Task>, BbsError> {
        let node = self
            .store
            .get(&task_schema_path(guid))
            .await
            .map_err(BbsError::StoreUnavailable)?;

        match node {
            Some(node) => Ok(Some(Task::from_json(&node.value)?)),
            None => Ok(None),
        }
    }

    /// Every decodable task. Corrupt records are skipped (convergence deletes them).
    pub async fn get_all_tasks(&self) -> Result<Vec<Task>, BbsError> {
        let nodes = match self.store.list_children(TASK_SCHEMA_ROOT).await {
            Ok(nodes) => nodes,
            Err(StoreError::KeyNotFound) => return Ok(Vec::new()),
            Err(e) => return Err(BbsError::StoreUnavailable(e)),
        };

        let mut tasks = Vec::with_capacity(nodes.len());
        for node in nodes {
            match Task::from_json(&node.value) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(key = %node.key, error = %e, "skipping undecodable task"),
            }
        }
        Ok(tasks)
    }

    pub async fn get_all_tasks_in_state(&self, state: TaskState) -> Result<Vec<Task>, BbsError> {
        let mut tasks = self.get_all_tasks().await?;
        tasks.retain(|task| task.state == state);
        Ok(tasks)
    }

    /// IDs of every executor currently maintaining presence.
    pub async fn get_all_executors(&self) -> Result<Vec<ExecutorId>, BbsError> {
        match self.store.list_children(EXECUTOR_SCHEMA_ROOT).await {
            Ok(nodes) => Ok(nodes.iter().map(|n| ExecutorId::new(n.name())).collect()),
            Err(StoreError::KeyNotFound) => Ok(Vec::new()),
            Err(e) => Err(BbsError::StoreUnavailable(e)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::ports::StoreNode;

    #[tokio::test]
    async fn get_task_returns_none_after_resolve() {
        let fx = Fixture::new();
        let mut task = task("a");
        fx.bbs.desire(&mut task).await.unwrap();
        assert_eq!(fx.bbs.get_task(&task.guid).await.unwrap(), Some(task.clone()));

        fx.bbs.resolve(&task).await.unwrap();
        assert_eq!(fx.bbs.get_task(&task.guid).await.unwrap(), None);
    }

    #[tokio::test]
    async fn queries_on_an_empty_store() {
        let fx = Fixture::new();
        assert!(fx.bbs.get_all_tasks().await.unwrap().is_empty());
        assert!(fx.bbs.get_all_executors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tasks_by_state_skip_corrupt_records() {
        let fx = Fixture::new();
        let mut a = task("a");
        let mut b = task("b");
        fx.bbs.desire(&mut a).await.unwrap();
        fx.bbs.desire(&mut b).await.unwrap();
        fx.bbs.claim(&mut b, &ExecutorId::new("e1")).await.unwrap();
        fx.store
            .set(StoreNode::new("/v2/run_once/junk", b"junk".to_vec()))
            .await
            .unwrap();

        let pending = fx.bbs.get_all_tasks_in_state(TaskState::Pending).await.unwrap();
        assert_eq!(pending, vec![a]);
        let claimed = fx.bbs.get_all_tasks_in_state(TaskState::Claimed).await.unwrap();
        assert_eq!(claimed, vec![b]);
        assert_eq!(fx.bbs.get_all_tasks().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn executors_are_listed_by_presence_key() {
        let fx = Fixture::new();
        for id in ["e1", "e2"] {
            fx.store
                .set(StoreNode::new(format!("/v2/executor/{id}"), vec![]))
                .await
                .unwrap();
        }
        let ids = fx.bbs.get_all_executors().await.unwrap();
        assert_eq!(ids, vec![ExecutorId::new("e1"), ExecutorId::new("e2")]);
    }

    #[tokio::test]
    async fn store_failures_surface_as_unavailable() {
        let fx = Fixture::new();
        fx.store.inject_failures([StoreError::Unavailable("down".into())]);
        let err = fx.bbs.get_all_tasks().await.unwrap_err();
        assert!(matches!(err, BbsError::StoreUnavailable(StoreError::Unavailable(_))));
    }
}
