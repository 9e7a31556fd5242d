//! TaskQueue: the shared, file-backed priority queue.
//!
//! The whole queue is one document, `{ "tasks": [TaskItem...] }`. Claims are a
//! check-then-update: a plain read finds a candidate, then the document is
//! re-read under the write path and the candidate re-selected before it is
//! flipped to `claimed` and persisted with write-temp-then-rename. Two
//! processes racing on the same file can still both believe they won; callers
//! make execution idempotent (`complete`/`fail` on a terminal task is a no-op).

mod state;

pub use state::TaskState;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{NewTask, TaskId, TaskItem};
use crate::error::{ForemanError, Result};
use crate::identity::{AgentIdentity, AliasTable};
use crate::observability::QueueCounts;
use crate::ports::{Clock, IdGenerator};
use crate::store::{Document, JsonDocument, Recovery, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueDocument {
    #[serde(default)]
    pub tasks: Vec<TaskItem>,
}

impl Document for QueueDocument {
    const KIND: &'static str = "task_queue";

    /// Items without an id or target, and repeats of an earlier id, are
    /// dropped so one bad entry cannot cost the rest of the queue.
    fn repair(&mut self) -> Vec<String> {
        let mut dropped = Vec::new();
        let mut seen = HashSet::new();
        self.tasks.retain(|task| {
            let problem = if task.id.as_str().trim().is_empty() {
                Some("task with empty id".to_string())
            } else if task.target_agent.trim().is_empty() {
                Some(format!("task {} has no target agent", task.id))
            } else if !seen.insert(task.id.clone()) {
                Some(format!("duplicate task id {}", task.id))
            } else {
                None
            };
            match problem {
                Some(reason) => {
                    dropped.push(reason);
                    false
                }
                None => true,
            }
        });
        dropped
    }
}

/// Result of a terminal transition request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "task", rename_all = "snake_case")]
pub enum Transition {
    Applied(TaskItem),
    /// The task was already completed or failed; nothing changed.
    AlreadyTerminal(TaskItem),
}

impl Transition {
    pub fn task(&self) -> &TaskItem {
        match self {
            Transition::Applied(task) | Transition::AlreadyTerminal(task) => task,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

pub struct TaskQueue {
    doc: JsonDocument<QueueDocument>,
    aliases: AliasTable,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskQueue {
    pub fn open(
        path: impl Into<PathBuf>,
        aliases: AliasTable,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            doc: JsonDocument::new(path, Recovery::Reinitialize, retry),
            aliases,
            clock,
            ids,
        }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Add a pending task. Enqueueing an id that already exists returns the
    /// stored task unchanged.
    pub fn enqueue(&self, request: NewTask) -> Result<TaskItem> {
        if request.target_agent.trim().is_empty() {
            return Err(ForemanError::InvalidArgument {
                field: "target_agent",
                value: request.target_agent,
            });
        }
        let id = match request.id {
            Some(id) if id.as_str().trim().is_empty() => {
                return Err(ForemanError::InvalidArgument {
                    field: "id",
                    value: id.to_string(),
                });
            }
            Some(id) => id,
            None => self.ids.generate_task_id(),
        };

        let now = self.clock.now();
        let (task, created) = self.doc.update_if_changed(|doc| {
            if let Some(existing) = doc.tasks.iter().find(|t| t.id == id) {
                return ((existing.clone(), false), false);
            }
            let task = TaskItem {
                id: id.clone(),
                target_agent: request.target_agent,
                description: request.description,
                priority: request.priority,
                state: TaskState::Pending,
                created_at: now,
                claimed_by: None,
                claimed_at: None,
                finished_at: None,
                last_error: None,
            };
            doc.tasks.push(task.clone());
            ((task, true), true)
        })?;

        if created {
            info!(task = %task.id, target = %task.target_agent, priority = task.priority, "task enqueued");
        } else {
            debug!(task = %task.id, "task already enqueued");
        }
        Ok(task)
    }

    /// Claim the most urgent pending task addressed to `agent`.
    ///
    /// Order: highest priority, then earliest `created_at`, then smallest id.
    /// `Ok(None)` when nothing matches.
    pub fn claim_next(&self, agent: &str) -> Result<Option<TaskItem>> {
        let identity = AgentIdentity::parse(agent, &self.aliases);

        // cheap read first so idle polling never rewrites the document
        let snapshot = self.doc.read()?;
        if select(&snapshot.tasks, &identity, &self.aliases).is_none() {
            debug!(agent = %identity, "no claimable task");
            return Ok(None);
        }

        let now = self.clock.now();
        let claimed = self.doc.update_if_changed(|doc| {
            match select(&doc.tasks, &identity, &self.aliases) {
                Some(index) => {
                    let task = &mut doc.tasks[index];
                    task.claim(identity.canonical(), now);
                    (Some(task.clone()), true)
                }
                None => (None, false),
            }
        })?;

        if let Some(task) = &claimed {
            info!(agent = %identity, task = %task.id, priority = task.priority, "task claimed");
        }
        Ok(claimed)
    }

    pub fn complete(&self, id: &TaskId) -> Result<Transition> {
        self.finish(id, TaskState::Completed, None)
    }

    pub fn fail(&self, id: &TaskId, reason: impl Into<String>) -> Result<Transition> {
        self.finish(id, TaskState::Failed, Some(reason.into()))
    }

    fn finish(&self, id: &TaskId, to: TaskState, error: Option<String>) -> Result<Transition> {
        let now = self.clock.now();
        let transition = self.doc.update_if_changed(|doc| {
            let Some(task) = doc.tasks.iter_mut().find(|t| &t.id == id) else {
                return (Err(ForemanError::TaskNotFound(id.clone())), false);
            };
            match task.state {
                TaskState::Claimed => {
                    task.finish(to, error, now);
                    (Ok(Transition::Applied(task.clone())), true)
                }
                state if state.is_terminal() => (Ok(Transition::AlreadyTerminal(task.clone())), false),
                from => (
                    Err(ForemanError::InvalidTransition {
                        task: id.clone(),
                        from,
                        to,
                    }),
                    false,
                ),
            }
        })??;

        match &transition {
            Transition::Applied(task) => info!(task = %task.id, state = %task.state, "task finished"),
            Transition::AlreadyTerminal(task) => {
                warn!(task = %task.id, state = %task.state, requested = %to, "task already terminal, ignoring")
            }
        }
        Ok(transition)
    }

    /// Return a claimed task to `pending` so another worker can pick it up.
    /// Re-queueing a pending task is a no-op.
    pub fn requeue(&self, id: &TaskId) -> Result<TaskItem> {
        let task = self.doc.update_if_changed(|doc| {
            let Some(task) = doc.tasks.iter_mut().find(|t| &t.id == id) else {
                return (Err(ForemanError::TaskNotFound(id.clone())), false);
            };
            match task.state {
                TaskState::Pending => (Ok(task.clone()), false),
                TaskState::Claimed => {
                    task.release();
                    (Ok(task.clone()), true)
                }
                from => (
                    Err(ForemanError::InvalidTransition {
                        task: id.clone(),
                        from,
                        to: TaskState::Pending,
                    }),
                    false,
                ),
            }
        })??;
        info!(task = %task.id, "task re-queued");
        Ok(task)
    }

    pub fn get(&self, id: &TaskId) -> Result<Option<TaskItem>> {
        Ok(self.doc.read()?.tasks.into_iter().find(|t| &t.id == id))
    }

    pub fn list(&self) -> Result<Vec<TaskItem>> {
        Ok(self.doc.read()?.tasks)
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        Ok(QueueCounts::tally(&self.doc.read()?.tasks))
    }
}

fn select(tasks: &[TaskItem], identity: &AgentIdentity, aliases: &AliasTable) -> Option<usize> {
    tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.state.is_claimable() && identity.matches(&t.target_agent, aliases))
        .min_by(|(_, a), (_, b)| claim_order(a, b))
        .map(|(index, _)| index)
}

fn claim_order(a: &TaskItem, b: &TaskItem) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.as_str().cmp(b.id.as_str()))
}
