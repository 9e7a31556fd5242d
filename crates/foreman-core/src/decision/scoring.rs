//! Confidence scoring.
//!
//! [`score_confidence`] is the whole heuristic: a base depending on whether
//! the signature has history, a bounded success-rate adjustment, a saturating
//! occurrence boost and a severity boost, clamped to `[0, 1]`. Every constant
//! lives in [`ScoringCoefficients`] so it can be tuned from `model_params.json`.

use serde::{Deserialize, Serialize};

use crate::domain::Severity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringCoefficients {
    /// Base when the signature has at least one correlation entry.
    pub known_base: f64,
    /// Base when it has none.
    pub unknown_base: f64,
    /// Bound on `success_rate - 0.5` in either direction.
    pub success_rate_clamp: f64,
    pub occurrence_boost_cap: f64,
    /// Occurrences at which the boost reaches its cap.
    pub occurrence_saturation_point: f64,
    pub high_severity_boost: f64,
    pub max_alternatives: usize,
}

impl Default for ScoringCoefficients {
    fn default() -> Self {
        Self {
            known_base: 0.5,
            unknown_base: 0.3,
            success_rate_clamp: 0.2,
            occurrence_boost_cap: 0.15,
            occurrence_saturation_point: 10.0,
            high_severity_boost: 0.15,
            max_alternatives: 3,
        }
    }
}

/// History of the action being scored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionStats {
    pub success_rate: f64,
    pub occurrences: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    /// Does the signature have any correlation entry at all?
    pub known: bool,
    pub action: Option<ActionStats>,
    pub severity: Severity,
}

pub fn score_confidence(inputs: &ScoreInputs, k: &ScoringCoefficients) -> f64 {
    let mut confidence = if inputs.known { k.known_base } else { k.unknown_base };

    if let Some(stats) = inputs.action {
        let clamp = k.success_rate_clamp.abs();
        confidence += (stats.success_rate - 0.5).clamp(-clamp, clamp);
        confidence += occurrence_boost(stats.occurrences, k);
    }

    if inputs.severity == Severity::High {
        confidence += k.high_severity_boost;
    }

    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, 1.0)
}

fn occurrence_boost(occurrences: u64, k: &ScoringCoefficients) -> f64 {
    if k.occurrence_saturation_point <= 0.0 {
        return k.occurrence_boost_cap;
    }
    let scaled = occurrences as f64 / k.occurrence_saturation_point * k.occurrence_boost_cap;
    scaled.min(k.occurrence_boost_cap)
}
