//! Configuration: where the shared documents live and how workers behave.
//!
//! Lookup order: explicit path, `$FOREMAN_CONFIG`, `<state_dir>/foreman.toml`,
//! built-in defaults. The state directory comes from `--state-dir`,
//! `$FOREMAN_HOME`, the config file, or `.foreman`, in that order.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ForemanError, Result};
use crate::identity::AliasTable;
use crate::store::RetryPolicy;

pub const CONFIG_FILE_NAME: &str = "foreman.toml";
pub const CONFIG_ENV: &str = "FOREMAN_CONFIG";
pub const HOME_ENV: &str = "FOREMAN_HOME";
pub const DEFAULT_STATE_DIR: &str = ".foreman";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForemanConfig {
    pub state_dir: PathBuf,
    /// Heartbeat age after which readers treat a worker as stale.
    pub stale_after_secs: u64,
    pub poll_interval_secs: u64,
    pub retry: RetrySettings,
    pub identity: AliasTable,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            stale_after_secs: 300,
            poll_interval_secs: 5,
            retry: RetrySettings::default(),
            identity: AliasTable::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

/// Well-known document locations under the state directory.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePaths {
    pub status: PathBuf,
    pub queue: PathBuf,
    pub knowledge_dir: PathBuf,
    pub policy: PathBuf,
    pub governor_state: PathBuf,
    pub audit: PathBuf,
}

impl StatePaths {
    pub fn under(root: &Path) -> Self {
        Self {
            status: root.join("agent_status.json"),
            queue: root.join("task_queue.json"),
            knowledge_dir: root.join("knowledge"),
            policy: root.join("fallback_policy.json"),
            governor_state: root.join("governor_state.json"),
            audit: root.join("escalations.jsonl"),
        }
    }
}

impl ForemanConfig {
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ForemanError::Config {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| ForemanError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Resolve configuration from arguments and the process environment.
    pub fn discover(explicit: Option<&Path>, state_dir: Option<&Path>) -> Result<Self> {
        Self::discover_with(explicit, state_dir, |key| std::env::var(key).ok())
    }

    pub fn discover_with(
        explicit: Option<&Path>,
        state_dir: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let state_override = state_dir
            .map(Path::to_path_buf)
            .or_else(|| env(HOME_ENV).map(PathBuf::from));

        let file = explicit
            .map(Path::to_path_buf)
            .or_else(|| env(CONFIG_ENV).map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::load_file(&path)?,
            None => {
                let root = state_override
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
                let candidate = root.join(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    Self::load_file(&candidate)?
                } else {
                    debug!(path = %candidate.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };

        if let Some(root) = state_override {
            config.state_dir = root;
        }
        Ok(config)
    }

    pub fn paths(&self) -> StatePaths {
        StatePaths::under(&self.state_dir)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs.min(i64::MAX as u64) as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
