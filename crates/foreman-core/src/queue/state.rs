//! Task state machine for the queue.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Pending -> Claimed -> Completed
/// - Pending -> Claimed -> Failed
/// - Claimed -> Pending (re-queued by a reaper after its worker went stale)
///
/// Items are never deleted by the queue; terminal items stay for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a matching worker.
    Pending,

    /// Owned by exactly one worker.
    Claimed,

    /// Finished successfully.
    Completed,

    /// Finished unsuccessfully.
    Failed,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Is this task eligible for `claim_next`?
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskState::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Claimed => "claimed",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
