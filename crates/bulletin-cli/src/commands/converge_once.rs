//! `bulletin converge-once`
//!
//! Seeds a fresh in-memory store with the tasks of a JSON file (an array of
//! task records, exactly as stored) plus presence markers for the given
//! executors, runs one convergence pass and prints the report and the
//! resulting counts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;

use bulletin_core::app::{BbsBuilder, TaskCounts};
use bulletin_core::domain::{ExecutorId, Task};
use bulletin_core::impls::InMemoryStore;
use bulletin_core::ports::{StoreAdapter, StoreNode};
use bulletin_core::schema::{executor_schema_path, task_schema_path};
use bulletin_core::{BulletinConfig, ConvergeReport};

#[derive(Debug, Args)]
pub struct ConvergeOnceArgs {
    /// JSON file holding an array of task records.
    #[arg(long)]
    pub tasks: PathBuf,

    /// Executors considered alive (repeatable).
    #[arg(long = "executor")]
    pub executors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Summary {
    report: ConvergeReport,
    counts: TaskCounts,
}

pub async fn execute(args: ConvergeOnceArgs, config: &BulletinConfig) -> Result<()> {
    let raw = std::fs::read(&args.tasks)
        .with_context(|| format!("reading {}", args.tasks.display()))?;
    let tasks: Vec<Task> = serde_json::from_slice(&raw).context("parsing task file")?;

    let store = InMemoryStore::new();
    for task in &tasks {
        store
            .set(StoreNode::new(task_schema_path(&task.guid), task.to_json()?))
            .await?;
    }
    for id in &args.executors {
        store
            .set(StoreNode::new(executor_schema_path(&ExecutorId::new(id.as_str())), Vec::new()))
            .await?;
    }
    info!(tasks = tasks.len(), executors = args.executors.len(), "store seeded");

    let bbs = BbsBuilder::new()
        .store(Arc::new(store))
        .config(config)
        .build()?;

    let report = bbs.converge(&config.converge()).await?;
    let counts = bbs.counts_by_state().await?;

    println!("{}", serde_json::to_string_pretty(&Summary { report, counts })?);
    Ok(())
}
