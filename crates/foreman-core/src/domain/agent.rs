use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;
use crate::error::ForemanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Busy,
    Stale,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Running => "running",
            AgentState::Busy => "busy",
            AgentState::Stale => "stale",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = ForemanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" | "available" | "ready" => Ok(AgentState::Idle),
            "running" => Ok(AgentState::Running),
            "busy" | "in_progress" => Ok(AgentState::Busy),
            "stale" => Ok(AgentState::Stale),
            _ => Err(ForemanError::InvalidArgument {
                field: "state",
                value: s.to_string(),
            }),
        }
    }
}

/// Liveness record of one worker, keyed by canonical agent name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub state: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<TaskId>,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentStatus {
    /// State as a reader should see it: anything silent for longer than
    /// `stale_after` reads as stale. The stored record is left untouched.
    pub fn effective_state(&self, now: DateTime<Utc>, stale_after: Duration) -> AgentState {
        if now - self.last_heartbeat > stale_after {
            AgentState::Stale
        } else {
            self.state
        }
    }
}
