//! Events - 構造化ログイベント
//!
//! Every noteworthy decision (a convergence repair, a failed CAS, a lost lock)
//! is described by a `BbsEvent` and handed to an `EventSink`. The set of
//! fields is fixed so sinks can map them to structured log fields without
//! guessing.

use std::time::Duration;

use super::ids::{ExecutorId, TaskGuid};
use super::state::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Strongly-typed log event.
#[derive(Debug, Clone, PartialEq)]
pub struct BbsEvent {
    /// Dotted event name, e.g. `runonce.converge.failed-to-claim`.
    pub name: &'static str,
    pub severity: Severity,
    pub task: Option<TaskGuid>,
    pub state: Option<TaskState>,
    pub executor: Option<ExecutorId>,
    pub key: Option<String>,
    pub error: Option<String>,
    pub took: Option<Duration>,
}

impl BbsEvent {
    pub fn new(name: &'static str, severity: Severity) -> Self {
        Self {
            name,
            severity,
            task: None,
            state: None,
            executor: None,
            key: None,
            error: None,
            took: None,
        }
    }

    pub fn info(name: &'static str) -> Self {
        Self::new(name, Severity::Info)
    }

    pub fn warn(name: &'static str) -> Self {
        Self::new(name, Severity::Warn)
    }

    pub fn error(name: &'static str) -> Self {
        Self::new(name, Severity::Error)
    }

    /// Fill task, state and executor fields from a task record.
    pub fn with_task(mut self, task: &super::Task) -> Self {
        self.task = Some(task.guid.clone());
        self.state = Some(task.state);
        if !task.executor_id.is_empty() {
            self.executor = Some(task.executor_id.clone());
        }
        self
    }

    pub fn with_executor(mut self, executor: ExecutorId) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_took(mut self, took: Duration) -> Self {
        self.took = Some(took);
        self
    }
}
