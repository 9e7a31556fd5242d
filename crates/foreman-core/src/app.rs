//! Wiring: one [`Foreman`] holds every component over one state directory.
//!
//! ```ignore
//! let config = ForemanConfig::discover(None, None)?;
//! let foreman = ForemanBuilder::new(config).build();
//! let task = foreman.queue().claim_next("agent_build.sh")?;
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::config::ForemanConfig;
use crate::decision::DecisionEngine;
use crate::governor::FallbackGovernor;
use crate::knowledge::KnowledgeBase;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::queue::TaskQueue;
use crate::status::StatusStore;

pub struct ForemanBuilder {
    config: ForemanConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl ForemanBuilder {
    pub fn new(config: ForemanConfig) -> Self {
        Self {
            config,
            clock: None,
            ids: None,
        }
    }

    /// Replace the wall clock (tests, replay).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Nothing is touched on disk until the first operation.
    pub fn build(self) -> Foreman {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let paths = self.config.paths();
        let retry = self.config.retry_policy();
        debug!(state_dir = %self.config.state_dir.display(), "wiring foreman components");

        let status = StatusStore::open(
            &paths.status,
            self.config.identity.clone(),
            clock.clone(),
            retry.clone(),
        );
        let queue = TaskQueue::open(
            &paths.queue,
            self.config.identity.clone(),
            clock.clone(),
            ids.clone(),
            retry.clone(),
        );
        let decisions = DecisionEngine::new(
            KnowledgeBase::open(&paths.knowledge_dir, clock.clone(), retry.clone()),
            clock.clone(),
            ids,
        );
        let governor = FallbackGovernor::open(
            &paths.policy,
            &paths.governor_state,
            &paths.audit,
            clock.clone(),
            retry,
        );

        Foreman {
            config: self.config,
            clock,
            status: Arc::new(status),
            queue: Arc::new(queue),
            decisions: Arc::new(decisions),
            governor: Arc::new(governor),
        }
    }
}

/// Cheap to clone; components are shared.
#[derive(Clone)]
pub struct Foreman {
    config: ForemanConfig,
    clock: Arc<dyn Clock>,
    status: Arc<StatusStore>,
    queue: Arc<TaskQueue>,
    decisions: Arc<DecisionEngine>,
    governor: Arc<FallbackGovernor>,
}

impl Foreman {
    pub fn open(config: ForemanConfig) -> Self {
        ForemanBuilder::new(config).build()
    }

    pub fn config(&self) -> &ForemanConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn decisions(&self) -> &DecisionEngine {
        &self.decisions
    }

    pub fn governor(&self) -> &FallbackGovernor {
        &self.governor
    }
}
