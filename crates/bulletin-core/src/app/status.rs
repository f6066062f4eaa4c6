//! Status - タスク状態の集計ビュー

use serde::{Deserialize, Serialize};

use crate::bbs::Bbs;
use crate::domain::{BbsError, Task, TaskState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub claimed: usize,
    pub running: usize,
    pub completed: usize,
    pub resolving: usize,
}

impl TaskCounts {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            *counts.slot(task.state) += 1;
        }
        counts
    }

    fn slot(&mut self, state: TaskState) -> &mut usize {
        match state {
            TaskState::Pending => &mut self.pending,
            TaskState::Claimed => &mut self.claimed,
            TaskState::Running => &mut self.running,
            TaskState::Completed => &mut self.completed,
            TaskState::Resolving => &mut self.resolving,
        }
    }

    pub fn get(&self, state: TaskState) -> usize {
        match state {
            TaskState::Pending => self.pending,
            TaskState::Claimed => self.claimed,
            TaskState::Running => self.running,
            TaskState::Completed => self.completed,
            TaskState::Resolving => self.resolving,
        }
    }

    pub fn total(&self) -> usize {
        TaskState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

impl Bbs {
    /// Snapshot of how many tasks sit in each state.
    pub async fn counts_by_state(&self) -> Result<TaskCounts, BbsError> {
        let tasks = self.get_all_tasks().await?;
        Ok(TaskCounts::from_tasks(&tasks))
    }
}
