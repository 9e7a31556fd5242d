use serde::{Deserialize, Serialize};

use crate::domain::TaskItem;
use crate::queue::TaskState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a TaskItem>) -> Self {
        let mut counts = QueueCounts::default();
        for task in tasks {
            match task.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Claimed => counts.claimed += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.claimed + self.completed + self.failed
    }
}
