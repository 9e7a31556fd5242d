//! StatusStore: persisted registry of worker liveness.
//!
//! One document, `{ "agents": { name: AgentStatus }, "last_update": ... }`,
//! keyed by canonical agent identity. Last write wins per agent; a corrupt
//! document is quarantined and replaced by an empty one.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{AgentState, AgentStatus, TaskId};
use crate::error::{ForemanError, Result};
use crate::identity::{AgentIdentity, AliasTable};
use crate::ports::Clock;
use crate::store::{Document, JsonDocument, Recovery, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

impl Document for StatusDocument {
    const KIND: &'static str = "agent_status";

    fn validate(&self) -> std::result::Result<(), String> {
        for (key, status) in &self.agents {
            if key.is_empty() {
                return Err("agent entry with empty name".to_string());
            }
            if status.name != *key {
                return Err(format!("entry {key:?} holds status for {:?}", status.name));
            }
        }
        Ok(())
    }
}

/// A point-in-time read of every agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub agents: BTreeMap<String, AgentStatus>,
    pub last_update: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn get(&self, canonical: &str) -> Option<&AgentStatus> {
        self.agents.get(canonical)
    }

    pub fn stale_agents(&self, now: DateTime<Utc>, stale_after: Duration) -> Vec<&AgentStatus> {
        self.agents
            .values()
            .filter(|s| s.effective_state(now, stale_after) == AgentState::Stale)
            .collect()
    }

    /// Agents with their state as a reader should see it.
    pub fn effective(&self, now: DateTime<Utc>, stale_after: Duration) -> Vec<(String, AgentState)> {
        self.agents
            .values()
            .map(|s| (s.name.clone(), s.effective_state(now, stale_after)))
            .collect()
    }
}

pub struct StatusStore {
    doc: JsonDocument<StatusDocument>,
    aliases: AliasTable,
    clock: Arc<dyn Clock>,
}

impl StatusStore {
    pub fn open(
        path: impl Into<PathBuf>,
        aliases: AliasTable,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            doc: JsonDocument::new(path, Recovery::Reinitialize, retry),
            aliases,
            clock,
        }
    }

    /// Record a status report.
    ///
    /// `pid = None` keeps the previously recorded owner; `task_id` replaces the
    /// current task as given. The heartbeat never moves backwards.
    pub fn upsert(
        &self,
        agent: &str,
        state: AgentState,
        pid: Option<u32>,
        task_id: Option<TaskId>,
    ) -> Result<AgentStatus> {
        let identity = AgentIdentity::parse(agent, &self.aliases);
        let name = identity.canonical().to_string();
        if name.is_empty() {
            return Err(ForemanError::InvalidArgument {
                field: "agent",
                value: agent.to_string(),
            });
        }

        let now = self.clock.now();
        let status = self.doc.update(|doc| {
            let previous = doc.agents.get(&name);
            let last_heartbeat = previous
                .map(|p| p.last_heartbeat.max(now))
                .unwrap_or(now);
            let owner_pid = pid.or_else(|| previous.and_then(|p| p.owner_pid));

            let status = AgentStatus {
                name: name.clone(),
                state,
                owner_pid,
                current_task_id: task_id,
                last_heartbeat,
            };
            doc.agents.insert(name.clone(), status.clone());
            doc.last_update = Some(doc.last_update.map_or(now, |t| t.max(now)));
            status
        })?;

        debug!(agent = %status.name, state = %status.state, "status reported");
        Ok(status)
    }

    pub fn read(&self) -> Result<StatusSnapshot> {
        let doc = self.doc.read()?;
        Ok(StatusSnapshot {
            agents: doc.agents,
            last_update: doc.last_update,
        })
    }

    /// Drop a decommissioned agent. Returns whether an entry existed.
    pub fn remove(&self, agent: &str) -> Result<bool> {
        let name = self.aliases.canonicalize(agent);
        let removed = self.doc.update(|doc| doc.agents.remove(&name).is_some())?;
        if removed {
            info!(agent = %name, "agent removed from status registry");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use std::fs;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn store(dir: &std::path::Path, clock: Arc<FixedClock>) -> StatusStore {
        StatusStore::open(
            dir.join("agent_status.json"),
            AliasTable::default(),
            clock,
            RetryPolicy::default(),
        )
    }

    #[test]
    fn upsert_keys_by_canonical_identity() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(t0()));
        let s = store(dir.path(), clock);

        s.upsert("agent_build.sh", AgentState::Running, Some(100), None).unwrap();
        s.upsert("build_agent", AgentState::Busy, None, Some(TaskId::new("t1"))).unwrap();

        let snap = s.read().unwrap();
        assert_eq!(snap.agents.len(), 1);
        let build = snap.get("build").unwrap();
        assert_eq!(build.state, AgentState::Busy);
        assert_eq!(build.owner_pid, Some(100));
        assert_eq!(build.current_task_id, Some(TaskId::new("t1")));
    }

    #[test]
    fn heartbeat_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(t0()));
        let s = store(dir.path(), clock.clone());

        s.upsert("build", AgentState::Running, None, None).unwrap();
        clock.set(t0() - Duration::minutes(5));
        let status = s.upsert("build", AgentState::Idle, None, None).unwrap();

        assert_eq!(status.last_heartbeat, t0());
        assert_eq!(status.state, AgentState::Idle);
    }

    #[test]
    fn readers_see_stale_agents_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(t0()));
        let s = store(dir.path(), clock.clone());

        s.upsert("build", AgentState::Busy, Some(1), None).unwrap();
        clock.advance(Duration::minutes(10));
        s.upsert("lint", AgentState::Running, Some(2), None).unwrap();

        let snap = s.read().unwrap();
        let stale: Vec<_> = snap
            .stale_agents(clock.now(), Duration::minutes(5))
            .into_iter()
            .map(|a| a.name.clone())
            .collect();
        assert_eq!(stale, vec!["build".to_string()]);
        assert_eq!(snap.get("build").unwrap().state, AgentState::Busy);
    }

    #[test]
    fn corrupt_document_reinitializes() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), Arc::new(FixedClock::new(t0())));
        fs::write(dir.path().join("agent_status.json"), "{\"agents\": [1,2").unwrap();

        assert!(s.read().unwrap().agents.is_empty());
        s.upsert("debug", AgentState::Idle, None, None).unwrap();
        assert!(s.read().unwrap().get("debug").is_some());
    }

    #[test]
    fn mismatched_entry_name_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), Arc::new(FixedClock::new(t0())));
        fs::write(
            dir.path().join("agent_status.json"),
            r#"{"agents": {"build": {"name": "lint", "state": "idle", "last_heartbeat": "2024-03-01T09:00:00Z"}}}"#,
        )
        .unwrap();

        assert!(s.read().unwrap().agents.is_empty());
    }

    #[test]
    fn remove_and_reject_blank_names() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), Arc::new(FixedClock::new(t0())));

        s.upsert("test", AgentState::Idle, None, None).unwrap();
        assert!(s.remove("agent_test.sh").unwrap());
        assert!(!s.remove("test").unwrap());

        let err = s.upsert("   ", AgentState::Idle, None, None).unwrap_err();
        assert!(matches!(err, ForemanError::InvalidArgument { field: "agent", .. }));
    }
}
