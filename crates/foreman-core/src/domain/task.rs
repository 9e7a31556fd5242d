use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;
use crate::queue::TaskState;

/// One work item in the shared queue.
///
/// Only the claiming worker mutates an item after creation. The claim fields
/// record who holds it so a retried claim or completion can be recognised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: TaskId,
    pub target_agent: String,
    #[serde(default)]
    pub description: String,
    /// Higher is more urgent.
    #[serde(default)]
    pub priority: i64,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TaskItem {
    pub fn claim(&mut self, owner: &str, now: DateTime<Utc>) {
        self.state = TaskState::Claimed;
        self.claimed_by = Some(owner.to_string());
        self.claimed_at = Some(now);
    }

    pub fn finish(&mut self, state: TaskState, error: Option<String>, now: DateTime<Utc>) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.finished_at = Some(now);
        self.last_error = error;
    }

    pub fn release(&mut self) {
        self.state = TaskState::Pending;
        self.claimed_by = None;
        self.claimed_at = None;
    }
}

/// Producer-side request to enqueue work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<TaskId>,
    pub target_agent: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i64,
}

impl NewTask {
    pub fn new(target_agent: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            target_agent: target_agent.into(),
            description: description.into(),
            priority: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}
