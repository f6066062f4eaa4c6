//! Key layout in the shared store.
//!
//! These paths are shared with every other process of the fleet and must not
//! change.

use crate::domain::{ExecutorId, TaskGuid};

pub const SCHEMA_ROOT: &str = "/v2";
pub const TASK_SCHEMA_ROOT: &str = "/v2/run_once";
pub const EXECUTOR_SCHEMA_ROOT: &str = "/v2/executor";
pub const LOCK_SCHEMA_ROOT: &str = "/v2/locks";

pub const CONVERGE_LOCK_NAME: &str = "converge_lock";

pub fn task_schema_path(guid: &TaskGuid) -> String {
    format!("{TASK_SCHEMA_ROOT}/{guid}")
}

pub fn executor_schema_path(executor_id: &ExecutorId) -> String {
    format!("{EXECUTOR_SCHEMA_ROOT}/{executor_id}")
}

pub fn lock_schema_path(lock_name: &str) -> String {
    format!("{LOCK_SCHEMA_ROOT}/{lock_name}")
}
