//! Task record and its wire codec.

use serde::{Deserialize, Serialize};

use super::errors::CodecError;
use super::ids::{ExecutorId, TaskGuid};
use super::state::TaskState;

/// The unit of work tracked by the registry.
///
/// Design:
/// - The stored JSON is the CAS "expected" value, so encoding must be
///   deterministic: field order is fixed by the struct and `actions` are
///   `serde_json::Value`s whose maps are sorted.
/// - `memory_mb`, `disk_mb`, `stack` and `actions` are opaque to the
///   coordination engine and never change after `Desire`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub guid: TaskGuid,

    #[serde(default)]
    pub reply_to: String,

    #[serde(default)]
    pub stack: String,

    #[serde(default)]
    pub memory_mb: u64,

    #[serde(default)]
    pub disk_mb: u64,

    /// Execution specification (flexible JSON, passed through to the executor).
    #[serde(default)]
    pub actions: Vec<serde_json::Value>,

    #[serde(default)]
    pub executor_id: ExecutorId,

    #[serde(default)]
    pub container_handle: String,

    #[serde(default)]
    pub failed: bool,

    #[serde(default)]
    pub failure_reason: String,

    #[serde(default)]
    pub result: String,

    pub state: TaskState,

    /// Nanoseconds since the epoch; set once by the first `Desire`.
    #[serde(default)]
    pub created_at: i64,

    /// Nanoseconds since the epoch; refreshed by every successful write.
    #[serde(default)]
    pub updated_at: i64,
}

impl Task {
    pub fn new(
        guid: TaskGuid,
        stack: impl Into<String>,
        memory_mb: u64,
        disk_mb: u64,
        actions: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            guid,
            reply_to: String::new(),
            stack: stack.into(),
            memory_mb,
            disk_mb,
            actions,
            executor_id: ExecutorId::empty(),
            container_handle: String::new(),
            failed: false,
            failure_reason: String::new(),
            result: String::new(),
            state: TaskState::Pending,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = reply_to.into();
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }

    /// Refresh `updated_at`, never moving it backwards.
    pub fn touch(&mut self, now_nanos: i64) {
        self.updated_at = self.updated_at.max(now_nanos);
    }

    /// Convergence repair: force the task into a failed completion.
    pub fn mark_failed(&self, reason: &str) -> Self {
        let mut task = self.clone();
        task.state = TaskState::Completed;
        task.failed = true;
        task.failure_reason = reason.to_string();
        task
    }

    /// Convergence repair: give the task back to the pool of pending work.
    pub fn demote_to_pending(&self) -> Self {
        let mut task = self.clone();
        task.state = TaskState::Pending;
        task.executor_id = ExecutorId::empty();
        task.container_handle = String::new();
        task
    }

    /// Convergence repair: let another stager resolve the task.
    pub fn demote_to_completed(&self) -> Self {
        let mut task = self.clone();
        task.state = TaskState::Completed;
        task
    }
}
