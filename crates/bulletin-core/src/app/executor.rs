//! ExecutorAgent - ワーカー側のタスク処理
//!
//! # フロー
//! 1. `handle_desired`: reserve memory → claim → hand the run off → reply
//! 2. background run: create container → start → run → complete
//! 3. memory is given back on every path out (claim lost, container not
//!    created, start failed, done)
//!
//! The agent also owns the executor's presence marker. Losing presence is
//! fatal: the agent cancels its lifecycle, since convergence is about to fail
//! every task it holds anyway.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use super::lifecycle::Lifecycle;
use super::AgentError;
use crate::bbs::Bbs;
use crate::domain::{BbsEvent, ExecutorId, Task};
use crate::ports::TaskRunner;

/// Reply to a desire notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Claimed; the run continues in the background.
    Claimed,
    /// Not enough memory left on this executor.
    NoCapacity,
    /// Another executor won (or the task is gone).
    AlreadyClaimed,
}

/// Local admission control. Only guards arithmetic, never a store call.
#[derive(Debug)]
struct MemoryPool {
    available_mb: u64,
}

#[derive(Clone)]
pub struct ExecutorAgent {
    id: ExecutorId,
    bbs: Bbs,
    runner: Arc<dyn TaskRunner>,
    memory: Arc<Mutex<MemoryPool>>,
    lifecycle: Lifecycle,
}

impl ExecutorAgent {
    pub fn new(
        id: ExecutorId,
        bbs: Bbs,
        runner: Arc<dyn TaskRunner>,
        max_memory_mb: u64,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            id,
            bbs,
            runner,
            memory: Arc::new(Mutex::new(MemoryPool {
                available_mb: max_memory_mb,
            })),
            lifecycle,
        }
    }

    pub fn id(&self) -> &ExecutorId {
        &self.id
    }

    pub fn available_memory_mb(&self) -> u64 {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .available_mb
    }

    pub fn reserve(&self, memory_mb: u64) -> Result<(), AgentError> {
        let mut pool = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.available_mb < memory_mb {
            return Err(AgentError::NoCapacity {
                requested: memory_mb,
                available: pool.available_mb,
            });
        }
        pool.available_mb -= memory_mb;
        Ok(())
    }

    pub fn release(&self, memory_mb: u64) {
        let mut pool = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        pool.available_mb = pool.available_mb.saturating_add(memory_mb);
    }

    /// Try to take a desired task.
    ///
    /// Returns as soon as the claim is settled; the run itself is spawned on
    /// the lifecycle.
    #[instrument(skip_all, fields(task = %task.guid, executor = %self.id))]
    pub async fn handle_desired(&self, mut task: Task) -> Result<ClaimOutcome, AgentError> {
        if let Err(e) = self.reserve(task.memory_mb) {
            debug!(error = %e, "executor full");
            return Ok(ClaimOutcome::NoCapacity);
        }

        match self.bbs.claim(&mut task, &self.id).await {
            Ok(()) => {
                info!("task claimed");
                let agent = self.clone();
                self.lifecycle.spawn(async move { agent.run_task(task).await });
                Ok(ClaimOutcome::Claimed)
            }
            Err(e) if e.is_conflict() => {
                self.release(task.memory_mb);
                debug!(error = %e, "claim lost");
                Ok(ClaimOutcome::AlreadyClaimed)
            }
            Err(e) => {
                self.release(task.memory_mb);
                Err(e.into())
            }
        }
    }

    #[instrument(skip_all, fields(task = %task.guid, executor = %self.id))]
    async fn run_task(&self, mut task: Task) {
        let memory_mb = task.memory_mb;

        let handle = match self.runner.create_container(&task).await {
            Ok(handle) => handle,
            Err(reason) => {
                // Still Claimed: the claimed-timeout demotion hands it to another executor.
                warn!(reason = %reason, "container creation failed");
                self.release(memory_mb);
                return;
            }
        };

        if let Err(e) = self.bbs.start(&mut task, &handle).await {
            error!(error = %e, "task start failed");
            self.runner.destroy_container(&handle).await;
            self.release(memory_mb);
            return;
        }

        let outcome = self.runner.run(&task, &handle).await;

        match self
            .bbs
            .complete(&mut task, outcome.failed, &outcome.failure_reason, &outcome.result)
            .await
        {
            Ok(()) => info!(failed = outcome.failed, "task completed"),
            Err(e) => error!(error = %e, "task complete failed"),
        }

        self.runner.destroy_container(&handle).await;
        self.release(memory_mb);
    }

    /// Start maintaining presence and watch it until shutdown.
    ///
    /// Waits until the marker is first held, so callers can announce the
    /// executor only once it is visible to convergence.
    pub async fn maintain_presence(&self, heartbeat: Duration) -> Result<(), AgentError> {
        let (handle, mut status) = self.bbs.maintain_executor_presence(heartbeat, &self.id).await?;

        match status.next().await {
            Some(true) => info!(executor = %self.id, "presence established"),
            _ => {
                handle.release().await;
                return Err(AgentError::PresenceLost(self.id.clone()));
            }
        }

        let token = self.lifecycle.token();
        let lifecycle = self.lifecycle.clone();
        let bbs = self.bbs.clone();
        let id = self.id.clone();

        self.lifecycle.spawn(async move {
            let voluntary = loop {
                tokio::select! {
                    _ = token.cancelled() => break true,
                    change = status.next() => match change {
                        Some(true) => continue,
                        Some(false) | None => break false,
                    },
                }
            };

            if !voluntary {
                bbs.emit(BbsEvent::error("executor.presence.lost").with_executor(id.clone()));
                lifecycle.cancel();
            }
            handle.release().await;
            status.drain().await;
            debug!(executor = %id, "presence released");
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::bbs::testing::{assert_walk, task, Fixture};
    use crate::bbs::ConvergeConfig;
    use crate::domain::TaskState;
    use crate::impls::SimulatedRunner;
    use crate::ports::{RunOutcome, StoreAdapter, StoreNode};
    use crate::schema::executor_schema_path;

    fn agent(fx: &Fixture, id: &str, memory: u64, runner: SimulatedRunner) -> ExecutorAgent {
        ExecutorAgent::new(
            ExecutorId::new(id),
            fx.bbs.clone(),
            Arc::new(runner),
            memory,
            Lifecycle::new(),
        )
    }

    #[test]
    fn memory_accounting() {
        let fx = Fixture::new();
        let agent = agent(&fx, "e1", 100, SimulatedRunner::instant());

        agent.reserve(60).unwrap();
        assert!(matches!(
            agent.reserve(50),
            Err(AgentError::NoCapacity { requested: 50, available: 40 })
        ));
        agent.release(60);
        assert_eq!(agent.available_memory_mb(), 100);
    }

    #[tokio::test]
    async fn claims_runs_and_completes() {
        let fx = Fixture::new();
        let agent = agent(&fx, "e1", 1000, SimulatedRunner::instant());
        let mut task = task("a");
        fx.bbs.desire(&mut task).await.unwrap();

        let outcome = agent.handle_desired(task.clone()).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::Claimed);

        agent.lifecycle.shutdown().await;
        let stored = fx.stored(&task.guid).unwrap();
        assert_eq!(stored.state, TaskState::Completed);
        assert!(!stored.failed);
        assert_eq!(stored.executor_id, ExecutorId::new("e1"));
        assert_eq!(stored.container_handle, "container-a");
        assert_eq!(agent.available_memory_mb(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_is_held_while_running() {
        let fx = Fixture::new();
        let agent = agent(&fx, "e1", 100, SimulatedRunner::new(0..0, 1000..1001));
        let mut task = task("a");
        fx.bbs.desire(&mut task).await.unwrap();

        agent.handle_desired(task.clone()).await.unwrap();
        assert_eq!(agent.available_memory_mb(), 100 - task.memory_mb);

        agent.lifecycle.shutdown().await;
        assert_eq!(agent.available_memory_mb(), 100);
    }

    #[tokio::test]
    async fn full_executor_does_not_claim() {
        let fx = Fixture::new();
        let agent = agent(&fx, "e1", 10, SimulatedRunner::instant());
        let mut task = task("a");
        fx.bbs.desire(&mut task).await.unwrap();

        let outcome = agent.handle_desired(task.clone()).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::NoCapacity);
        assert_eq!(fx.stored(&task.guid).unwrap().state, TaskState::Pending);
        assert_eq!(agent.available_memory_mb(), 10);
    }

    #[tokio::test]
    async fn lost_claim_gives_memory_back() {
        let fx = Fixture::new();
        let agent = agent(&fx, "e2", 1000, SimulatedRunner::instant());
        let mut task = task("a");
        fx.bbs.desire(&mut task).await.unwrap();
        let stale = task.clone();
        fx.bbs.claim(&mut task, &ExecutorId::new("e1")).await.unwrap();

        let outcome = agent.handle_desired(stale).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::AlreadyClaimed);
        assert_eq!(agent.available_memory_mb(), 1000);
    }

    /// Never manages to create a container.
    struct BrokenRunner;

    #[async_trait]
    impl TaskRunner for BrokenRunner {
        async fn create_container(&self, _task: &Task) -> Result<String, String> {
            Err("no disk".to_string())
        }

        async fn run(&self, _task: &Task, _container_handle: &str) -> RunOutcome {
            RunOutcome::failure("never started")
        }

        async fn destroy_container(&self, _container_handle: &str) {}
    }

    #[tokio::test]
    async fn failed_container_creation_leaves_the_claim_to_convergence() {
        let fx = Fixture::new();
        let agent = ExecutorAgent::new(
            ExecutorId::new("e1"),
            fx.bbs.clone(),
            Arc::new(BrokenRunner),
            1000,
            Lifecycle::new(),
        );
        fx.store
            .set(StoreNode::new(executor_schema_path(agent.id()), vec![]))
            .await
            .unwrap();
        let mut task = task("a");
        fx.bbs.desire(&mut task).await.unwrap();
        let mut walk = vec![fx.state_of(&task.guid)];

        let outcome = agent.handle_desired(task.clone()).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::Claimed);
        agent.lifecycle.shutdown().await;

        let stored = fx.stored(&task.guid).unwrap();
        assert_eq!(stored.state, TaskState::Claimed);
        assert!(!stored.failed);
        assert!(stored.container_handle.is_empty());
        assert_eq!(agent.available_memory_mb(), 1000);
        walk.push(stored.state);

        fx.clock.advance(ConvergeConfig::DEFAULT_CLAIMED_TIMEOUT);
        fx.bbs.converge(&ConvergeConfig::default()).await.unwrap();
        walk.push(fx.state_of(&task.guid));

        assert_walk(&walk);
        assert_eq!(walk, vec![TaskState::Pending, TaskState::Claimed, TaskState::Pending]);
    }

    #[tokio::test(start_paused = true)]
    async fn presence_is_visible_and_released_on_shutdown() {
        let fx = Fixture::new();
        let agent = agent(&fx, "e1", 1000, SimulatedRunner::instant());

        agent.maintain_presence(Duration::from_secs(2)).await.unwrap();
        assert_eq!(fx.bbs.get_all_executors().await.unwrap(), vec![ExecutorId::new("e1")]);

        agent.lifecycle.shutdown().await;
        assert!(fx.bbs.get_all_executors().await.unwrap().is_empty());
        assert!(fx.events.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn losing_presence_shuts_the_agent_down() {
        let fx = Fixture::new();
        let agent = agent(&fx, "e1", 1000, SimulatedRunner::instant());
        agent.maintain_presence(Duration::from_secs(2)).await.unwrap();

        let key = executor_schema_path(agent.id());
        fx.store.expire(&key);
        fx.store
            .set(StoreNode::new(key, b"imposter".to_vec()).with_ttl(Duration::from_secs(600)))
            .await
            .unwrap();

        agent.lifecycle.token().cancelled().await;
        agent.lifecycle.shutdown().await;
        assert_eq!(fx.events.names(), vec!["executor.presence.lost"]);
    }
}
