//! TaskRunner port - executor 側のコンテナ実行
//!
//! The coordination engine never looks inside `actions`; an executor hands
//! the claimed task to a runner that creates the container and runs it.

use async_trait::async_trait;

use crate::domain::Task;

/// Terminal outcome of running a task, recorded by `Complete`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub failed: bool,
    pub failure_reason: String,
    pub result: String,
}

impl RunOutcome {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            failed: false,
            failure_reason: String::new(),
            result: result.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            failed: true,
            failure_reason: reason.into(),
            result: String::new(),
        }
    }
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Prepare the execution environment; returns the container handle.
    async fn create_container(&self, task: &Task) -> Result<String, String>;

    /// Run the task's actions inside the container.
    async fn run(&self, task: &Task, container_handle: &str) -> RunOutcome;

    /// Throw away a container whose task was taken away before it started.
    async fn destroy_container(&self, container_handle: &str);
}
