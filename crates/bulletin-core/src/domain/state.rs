//! Task state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task record.
///
/// State transitions:
/// - Pending -> Claimed -> Running -> Completed -> Resolving -> (deleted)
/// - Claimed -> Pending (convergence: claimed for too long)
/// - Pending | Claimed | Running -> Completed (convergence: failed)
/// - Resolving -> Completed (convergence: resolving for too long)
///
/// Deletion after `Resolving` is not a state; the record simply disappears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Desired by a stager, waiting for an executor.
    Pending,

    /// An executor won the claim but has not started the container yet.
    Claimed,

    /// Running in a container on the claiming executor.
    Running,

    /// Finished (successfully or not); waiting for a stager to resolve it.
    Completed,

    /// A stager is handling the completion.
    Resolving,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        TaskState::Pending,
        TaskState::Claimed,
        TaskState::Running,
        TaskState::Completed,
        TaskState::Resolving,
    ];

    /// Is `self -> next` an edge of the state machine?
    ///
    /// Includes the convergence repairs (demotions and forced failures).
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, next),
            (Pending, Claimed)
                | (Pending, Completed)
                | (Claimed, Running)
                | (Claimed, Pending)
                | (Claimed, Completed)
                | (Running, Completed)
                | (Completed, Resolving)
                | (Resolving, Completed)
        )
    }

    /// Is the task bound to an executor that must stay alive?
    pub fn requires_executor(self) -> bool {
        matches!(self, TaskState::Claimed | TaskState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Claimed => "claimed",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Resolving => "resolving",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskState::Pending, TaskState::Claimed, true)]
    #[case(TaskState::Claimed, TaskState::Running, true)]
    #[case(TaskState::Claimed, TaskState::Pending, true)]
    #[case(TaskState::Running, TaskState::Completed, true)]
    #[case(TaskState::Completed, TaskState::Resolving, true)]
    #[case(TaskState::Resolving, TaskState::Completed, true)]
    #[case(TaskState::Pending, TaskState::Running, false)]
    #[case(TaskState::Running, TaskState::Claimed, false)]
    #[case(TaskState::Running, TaskState::Pending, false)]
    #[case(TaskState::Completed, TaskState::Pending, false)]
    #[case(TaskState::Resolving, TaskState::Pending, false)]
    fn edges(#[case] from: TaskState, #[case] to: TaskState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn no_self_loops() {
        for state in TaskState::ALL {
            assert!(!state.can_transition_to(state), "{state} -> {state}");
        }
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&TaskState::Resolving).unwrap();
        assert_eq!(json, r#""resolving""#);
        for state in TaskState::ALL {
            assert_eq!(
                serde_json::to_string(&state).unwrap(),
                format!("\"{}\"", state.as_str())
            );
        }
    }
}
