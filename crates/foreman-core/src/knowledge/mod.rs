//! KnowledgeBase: what was tried, and how well it worked.
//!
//! Three documents live in the knowledge directory:
//! - `action_history.jsonl`: append-only [`ActionRecord`] log
//! - `correlations.json`: signature → action → [`CorrelationEntry`]
//! - `model_params.json`: [`ModelParams`], defaults when absent or invalid

mod params;

pub use params::ModelParams;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{ActionRecord, CorrelationEntry, SituationSignature};
use crate::error::Result;
use crate::ports::Clock;
use crate::store::{Document, JsonDocument, JsonLines, Recovery, RetryPolicy};

pub const HISTORY_FILE: &str = "action_history.jsonl";
pub const CORRELATIONS_FILE: &str = "correlations.json";
pub const MODEL_PARAMS_FILE: &str = "model_params.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationDocument {
    #[serde(default)]
    pub correlations: BTreeMap<String, BTreeMap<String, CorrelationEntry>>,
}

impl Document for CorrelationDocument {
    const KIND: &'static str = "correlations";

    fn validate(&self) -> std::result::Result<(), String> {
        for (key, actions) in &self.correlations {
            let signature: SituationSignature = key.parse().map_err(|e| format!("{e}"))?;
            for (action, entry) in actions {
                if entry.signature != signature || entry.action != *action {
                    return Err(format!("entry under {key}/{action} describes {}/{}", entry.signature, entry.action));
                }
                if !(0.0..=1.0).contains(&entry.success_rate) {
                    return Err(format!("success_rate {} for {key}/{action} outside [0, 1]", entry.success_rate));
                }
            }
        }
        Ok(())
    }
}

pub struct KnowledgeBase {
    history: JsonLines<ActionRecord>,
    correlations: JsonDocument<CorrelationDocument>,
    params: JsonDocument<ModelParams>,
    clock: Arc<dyn Clock>,
}

impl KnowledgeBase {
    pub fn open(dir: impl AsRef<Path>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        let dir = dir.as_ref();
        Self {
            history: JsonLines::new(dir.join(HISTORY_FILE), retry.clone()),
            correlations: JsonDocument::new(dir.join(CORRELATIONS_FILE), Recovery::Reinitialize, retry.clone()),
            params: JsonDocument::new(dir.join(MODEL_PARAMS_FILE), Recovery::DefaultInMemory, retry),
            clock,
        }
    }

    pub fn params_path(&self) -> PathBuf {
        self.params.path().to_path_buf()
    }

    /// Current model parameters. Never fails: unreadable parameters fall back
    /// to defaults.
    pub fn params(&self) -> ModelParams {
        match self.params.read() {
            Ok(params) => params,
            Err(err) => {
                warn!(error = %err, "model parameters unreadable, using defaults");
                ModelParams::default()
            }
        }
    }

    pub fn append(&self, record: &ActionRecord) -> Result<()> {
        self.history.append(record)
    }

    pub fn history(&self) -> Result<Vec<ActionRecord>> {
        self.history.read_all()
    }

    /// Entries for `signature`, best first by `success_rate · ln(1 + occurrences)`.
    pub fn correlations_for(&self, signature: SituationSignature) -> Result<Vec<CorrelationEntry>> {
        let doc = self.correlations.read()?;
        let mut entries: Vec<CorrelationEntry> = doc
            .correlations
            .get(&signature.key())
            .map(|actions| actions.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| {
            b.rank_score()
                .total_cmp(&a.rank_score())
                .then_with(|| a.action.cmp(&b.action))
        });
        Ok(entries)
    }

    /// Fold one outcome into the (signature, action) success rate.
    pub fn update(&self, signature: SituationSignature, action: &str, success: bool) -> Result<CorrelationEntry> {
        let learning_rate = self.params().learning_rate;
        let now = self.clock.now();
        let entry = self.correlations.update(|doc| {
            let entry = doc
                .correlations
                .entry(signature.key())
                .or_default()
                .entry(action.to_string())
                .or_insert_with(|| CorrelationEntry::new(signature, action));
            entry.observe(success, learning_rate, now);
            entry.clone()
        })?;
        debug!(
            %signature,
            action,
            success,
            success_rate = entry.success_rate,
            occurrences = entry.occurrences,
            "correlation updated"
        );
        Ok(entry)
    }
}
