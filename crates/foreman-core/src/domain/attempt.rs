//! Remediation history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ActionId;
use super::situation::SituationSignature;

/// One remediation attempt and its result. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_id: ActionId,
    pub situation_signature: SituationSignature,
    pub action: String,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Learned success rate of one action for one signature, updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub signature: SituationSignature,
    pub action: String,
    pub success_rate: f64,
    pub occurrences: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CorrelationEntry {
    /// Neutral prior for a pair with no history.
    pub const PRIOR_SUCCESS_RATE: f64 = 0.5;

    pub fn new(signature: SituationSignature, action: impl Into<String>) -> Self {
        Self {
            signature,
            action: action.into(),
            success_rate: Self::PRIOR_SUCCESS_RATE,
            occurrences: 0,
            last_updated: None,
        }
    }

    /// Incremental weighted average toward the observed outcome.
    pub fn observe(&mut self, success: bool, learning_rate: f64, now: DateTime<Utc>) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate += learning_rate * (outcome - self.success_rate);
        self.success_rate = self.success_rate.clamp(0.0, 1.0);
        self.occurrences += 1;
        self.last_updated = Some(now);
    }

    /// Ranking weight: a high rate only counts once it has been seen a few times.
    pub fn rank_score(&self) -> f64 {
        self.success_rate * (1.0 + self.occurrences as f64).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, Severity};

    fn entry() -> CorrelationEntry {
        CorrelationEntry::new(
            SituationSignature::new(Category::Build, Severity::Medium),
            "rebuild",
        )
    }

    #[test]
    fn observe_moves_rate_by_learning_rate() {
        let mut e = entry();
        e.observe(true, 0.1, Utc::now());
        assert!((e.success_rate - 0.55).abs() < 1e-9);
        assert_eq!(e.occurrences, 1);

        e.observe(false, 0.1, Utc::now());
        assert!((e.success_rate - 0.495).abs() < 1e-9);
        assert_eq!(e.occurrences, 2);
    }

    #[test]
    fn repeated_successes_approach_one() {
        let mut e = entry();
        let mut last = e.success_rate;
        for _ in 0..100 {
            e.observe(true, 0.15, Utc::now());
            assert!(e.success_rate >= last);
            last = e.success_rate;
        }
        assert!(e.success_rate > 0.99);
    }

    #[test]
    fn unseen_entry_ranks_zero() {
        assert_eq!(entry().rank_score(), 0.0);
    }
}
