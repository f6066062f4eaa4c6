//! Convergence - 収束パス
//!
//! One pass, run only by the holder of the converge lock:
//!
//! 1. list every task and every executor presence marker (two reads)
//! 2. pick at most one rule per task from its state
//! 3. apply the scheduled repairs concurrently, each a CAS against the
//!    snapshot from step 1, and wait for all of them
//! 4. delete the records that could not be decoded
//!
//! A repair that loses its CAS is logged and dropped. The task changed since
//! the scan and the next pass looks at it again.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::Bbs;
use crate::domain::{BbsError, BbsEvent, Task, TaskState};
use crate::ports::{StoreAdapter, StoreError, StoreNode};
use crate::schema::{task_schema_path, EXECUTOR_SCHEMA_ROOT, TASK_SCHEMA_ROOT};

pub const NOT_CLAIMED_REASON: &str = "not claimed within time limit";
pub const EXECUTOR_DISAPPEARED_REASON: &str = "executor disappeared before completion";

/// Timeouts used by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergeConfig {
    /// How long a task may stay `Pending` before it is failed.
    pub time_to_claim: Duration,
    /// How long a live executor may sit on a `Claimed` task before it is demoted.
    pub claimed_timeout: Duration,
    /// How long a task may stay `Resolving` before another stager may take it.
    pub resolving_timeout: Duration,
}

impl ConvergeConfig {
    pub const DEFAULT_TIME_TO_CLAIM: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_CLAIMED_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_RESOLVING_TIMEOUT: Duration = Duration::from_secs(30);
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            time_to_claim: Self::DEFAULT_TIME_TO_CLAIM,
            claimed_timeout: Self::DEFAULT_CLAIMED_TIMEOUT,
            resolving_timeout: Self::DEFAULT_RESOLVING_TIMEOUT,
        }
    }
}

/// What a pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConvergeReport {
    pub scanned: usize,
    pub repaired: usize,
    pub repairs_dropped: usize,
    pub desires_kicked: usize,
    pub completions_kicked: usize,
    pub corrupt_deleted: usize,
}

/// A scheduled repair. `expected` is the record exactly as listed, so a
/// record written by another encoder still compares equal.
#[derive(Debug)]
struct Repair {
    expected: Vec<u8>,
    after: Task,
}

/// Children of `prefix`, where "no children" is an empty list.
async fn list_or_empty(store: &dyn StoreAdapter, prefix: &str) -> Result<Vec<StoreNode>, BbsError> {
    match store.list_children(prefix).await {
        Ok(nodes) => Ok(nodes),
        Err(StoreError::KeyNotFound) => Ok(Vec::new()),
        Err(e) => Err(BbsError::StoreUnavailable(e)),
    }
}

impl Bbs {
    /// Run one convergence pass.
    ///
    /// Fails only when one of the two listings fails; nothing is written in
    /// that case.
    #[instrument(skip_all)]
    pub async fn converge(&self, config: &ConvergeConfig) -> Result<ConvergeReport, BbsError> {
        let started = tokio::time::Instant::now();

        let task_nodes = list_or_empty(self.store.as_ref(), TASK_SCHEMA_ROOT).await?;
        let executor_nodes = list_or_empty(self.store.as_ref(), EXECUTOR_SCHEMA_ROOT).await?;

        let alive: HashSet<&str> = executor_nodes.iter().map(StoreNode::name).collect();
        let now = self.clock.now_nanos();
        let age = |since: i64| Duration::from_nanos(now.saturating_sub(since).max(0) as u64);

        let mut report = ConvergeReport {
            scanned: task_nodes.len(),
            ..ConvergeReport::default()
        };
        let mut repairs = Vec::new();
        let mut corrupt_keys = Vec::new();

        for node in &task_nodes {
            let task = match Task::from_json(&node.value) {
                Ok(task) => task,
                Err(e) => {
                    self.emit(
                        BbsEvent::error("runonce.converge.json-parse-failure")
                            .with_key(node.key.clone())
                            .with_error(&e),
                    );
                    corrupt_keys.push(node.key.clone());
                    continue;
                }
            };

            let executor_alive = alive.contains(task.executor_id.as_str());
            let repair = |after: Task| Repair {
                expected: node.value.clone(),
                after,
            };

            match task.state {
                state if state.requires_executor() && !executor_alive => {
                    self.emit(BbsEvent::error("runonce.converge.executor-disappeared").with_task(&task));
                    repairs.push(repair(task.mark_failed(EXECUTOR_DISAPPEARED_REASON)));
                }
                TaskState::Pending => {
                    if age(task.created_at) >= config.time_to_claim {
                        self.emit(BbsEvent::error("runonce.converge.failed-to-claim").with_task(&task));
                        repairs.push(repair(task.mark_failed(NOT_CLAIMED_REASON)));
                    } else {
                        self.notifier.notify_task_desired(&task).await;
                        report.desires_kicked += 1;
                    }
                }
                TaskState::Claimed => {
                    if age(task.updated_at) >= config.claimed_timeout {
                        self.emit(BbsEvent::error("runonce.converge.failed-to-start").with_task(&task));
                        repairs.push(repair(task.demote_to_pending()));
                    }
                }
                TaskState::Running => {}
                TaskState::Completed => {
                    self.notifier.notify_task_completed(&task).await;
                    report.completions_kicked += 1;
                }
                TaskState::Resolving => {
                    if age(task.updated_at) >= config.resolving_timeout {
                        self.emit(BbsEvent::error("runonce.converge.failed-to-resolve").with_task(&task));
                        repairs.push(repair(task.demote_to_completed()));
                    }
                }
            }
        }

        let (repaired, dropped) = self.apply_repairs(repairs, now).await;
        report.repaired = repaired;
        report.repairs_dropped = dropped;

        if !corrupt_keys.is_empty() {
            report.corrupt_deleted = corrupt_keys.len();
            match self.store.delete(&corrupt_keys).await {
                Ok(()) | Err(StoreError::KeyNotFound) => {}
                Err(e) => warn!(error = %e, keys = corrupt_keys.len(), "failed to delete corrupt tasks"),
            }
        }

        info!(
            scanned = report.scanned,
            repaired = report.repaired,
            dropped = report.repairs_dropped,
            corrupt = report.corrupt_deleted,
            took_ms = started.elapsed().as_millis() as u64,
            "convergence pass finished"
        );
        Ok(report)
    }

    /// Launch every repair at once and wait for all of them.
    ///
    /// Returns `(applied, dropped)`.
    async fn apply_repairs(&self, repairs: Vec<Repair>, now: i64) -> (usize, usize) {
        let mut set = JoinSet::new();

        for Repair { expected, mut after } in repairs {
            after.touch(now);
            let store: Arc<dyn StoreAdapter> = Arc::clone(&self.store);
            let key = task_schema_path(&after.guid);
            let value = after.to_json();

            set.spawn(async move {
                let res = match value {
                    Ok(value) => store
                        .compare_and_swap(&key, &expected, value)
                        .await
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                (after, res)
            });
        }

        let mut applied = 0;
        let mut dropped = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((task, Ok(()))) => {
                    debug!(task = %task.guid, state = %task.state, "repair applied");
                    applied += 1;
                }
                Ok((task, Err(error))) => {
                    self.emit(
                        BbsEvent::error("runonce.converge.failed-to-compare-and-swap")
                            .with_task(&task)
                            .with_error(error),
                    );
                    dropped += 1;
                }
                Err(e) => {
                    warn!(error = %e, "repair task panicked");
                    dropped += 1;
                }
            }
        }
        (applied, dropped)
    }
}
