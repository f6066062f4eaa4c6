//! `bulletin simulate`
//!
//! An in-process fleet sharing one in-memory store:
//! - `executors` executor agents, each maintaining presence and competing
//!   for the converge lock
//! - one stager desiring `tasks` tasks and resolving their completions
//! - a dispatcher fed by the notifier: desired tasks are offered to the
//!   executors round-robin from a random starting point until one claims it
//!
//! The run ends once every task has been resolved, on timeout, or on Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use bulletin_core::app::{
    BbsBuilder, ClaimOutcome, ConvergeLoop, ExecutorAgent, Lifecycle, StagerAgent, TaskCounts,
};
use bulletin_core::domain::Task;
use bulletin_core::impls::{ChannelNotifier, ChannelPublisher, InMemoryStore, Notification, SimulatedRunner};
use bulletin_core::ports::{IdGenerator, SystemClock, UlidGenerator};
use bulletin_core::BulletinConfig;

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Number of executors.
    #[arg(long, default_value_t = 3)]
    pub executors: usize,

    /// Number of tasks to desire.
    #[arg(long, default_value_t = 20)]
    pub tasks: usize,

    /// Memory requirement of each task.
    #[arg(long, default_value_t = 100)]
    pub task_memory_mb: u64,

    /// Lower bound of the simulated container creation time.
    #[arg(long, default_value_t = 500)]
    pub create_min_ms: u64,

    /// Upper bound of the simulated container creation time.
    #[arg(long, default_value_t = 1000)]
    pub create_max_ms: u64,

    /// Lower bound of the simulated run time.
    #[arg(long, default_value_t = 5000)]
    pub run_min_ms: u64,

    /// Upper bound of the simulated run time.
    #[arg(long, default_value_t = 5001)]
    pub run_max_ms: u64,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct Summary {
    desired: usize,
    resolved: usize,
    failed: usize,
    elapsed_ms: u64,
    remaining: TaskCounts,
}

/// Offer a desired task to every executor once, starting at a random one.
async fn dispatch(executors: &[ExecutorAgent], task: Task) {
    if executors.is_empty() {
        return;
    }
    let start = rand::thread_rng().gen_range(0..executors.len());

    for i in 0..executors.len() {
        let executor = &executors[(start + i) % executors.len()];
        match executor.handle_desired(task.clone()).await {
            Ok(ClaimOutcome::Claimed) | Ok(ClaimOutcome::AlreadyClaimed) => return,
            Ok(ClaimOutcome::NoCapacity) => continue,
            Err(e) => {
                warn!(task = %task.guid, executor = %executor.id(), error = %e, "dispatch failed");
            }
        }
    }
    debug!(task = %task.guid, "no executor took the task");
}

pub async fn execute(args: SimulateArgs, config: &BulletinConfig) -> Result<()> {
    let started = tokio::time::Instant::now();
    let lifecycle = Lifecycle::new();
    let ids = Arc::new(UlidGenerator::new(SystemClock));

    let (desired_tx, mut desired_rx) = mpsc::unbounded_channel();
    let (completed_tx, mut completed_rx) = mpsc::unbounded_channel();
    let bbs = BbsBuilder::new()
        .store(Arc::new(InMemoryStore::new()))
        .notifier(Arc::new(ChannelNotifier::new(desired_tx, completed_tx)))
        .config(config)
        .build()?;

    let runner = Arc::new(SimulatedRunner::new(
        args.create_min_ms..args.create_max_ms,
        args.run_min_ms..args.run_max_ms,
    ));

    let mut executors = Vec::with_capacity(args.executors);
    for _ in 0..args.executors {
        let agent = ExecutorAgent::new(
            ids.generate_executor_id(),
            bbs.clone(),
            runner.clone(),
            config.max_memory_mb,
            lifecycle.clone(),
        );
        agent.maintain_presence(config.heartbeat_interval()).await?;

        let converger = ConvergeLoop::new(
            bbs.clone(),
            agent.id().to_string(),
            config.convergence_interval(),
            config.converge(),
        );
        let token = lifecycle.token();
        lifecycle.spawn(async move {
            if let Err(e) = converger.run(token).await {
                warn!(error = %e, "converge loop failed");
            }
        });

        info!(executor = %agent.id(), "executor up");
        executors.push(agent);
    }
    let executors = Arc::new(executors);

    let (publisher, mut replies) = ChannelPublisher::channel();
    let stager = StagerAgent::new(bbs.clone(), ids.clone(), Arc::new(publisher));

    // desire → executors
    {
        let executors = executors.clone();
        let lifecycle_inner = lifecycle.clone();
        let token = lifecycle.token();
        lifecycle.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    Some(notification) = desired_rx.recv() => {
                        if let Notification::Desired(task) = notification {
                            let executors = executors.clone();
                            lifecycle_inner.spawn(async move { dispatch(&executors, task).await });
                        }
                    }
                }
            }
        });
    }

    // completion → stager
    {
        let stager = stager.clone();
        let lifecycle_inner = lifecycle.clone();
        let token = lifecycle.token();
        lifecycle.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    Some(notification) = completed_rx.recv() => {
                        if let Notification::Completed(task) = notification {
                            let stager = stager.clone();
                            lifecycle_inner.spawn(async move {
                                if let Err(e) = stager.handle_completed(task).await {
                                    debug!(error = %e, "completion not handled");
                                }
                            });
                        }
                    }
                }
            }
        });
    }

    for i in 0..args.tasks {
        let reply_to = format!("simulator.reply.{i}");
        stager
            .desire("lucid64", args.task_memory_mb, 1024, Vec::new(), &reply_to)
            .await?;
    }
    info!(tasks = args.tasks, "tasks desired");

    let mut resolved = 0;
    let mut failed = 0;
    let deadline = tokio::time::sleep(Duration::from_secs(args.timeout_secs));
    tokio::pin!(deadline);
    let shutdown = lifecycle.token();

    while resolved < args.tasks {
        tokio::select! {
            reply = replies.recv() => match reply {
                Some((reply_to, task)) => {
                    resolved += 1;
                    if task.failed {
                        failed += 1;
                    }
                    debug!(reply_to = %reply_to, task = %task.guid, failed = task.failed, "reply");
                }
                None => break,
            },
            _ = &mut deadline => {
                warn!(resolved, desired = args.tasks, "simulation timed out");
                break;
            }
            _ = shutdown.cancelled() => {
                warn!("lifecycle cancelled");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    let remaining = bbs.counts_by_state().await?;
    lifecycle.shutdown().await;

    let summary = Summary {
        desired: args.tasks,
        resolved,
        failed,
        elapsed_ms: started.elapsed().as_millis() as u64,
        remaining,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
