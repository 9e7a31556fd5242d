//! DecisionEngine: picks a remediation action for an observed failure.
//!
//! `evaluate` never fails. When history is unavailable it degrades to the
//! conservative per-category fallback, which is never auto-executed.

mod scoring;
mod taxonomy;

pub use scoring::{ActionStats, ScoreInputs, ScoringCoefficients, score_confidence};
pub use taxonomy::Taxonomy;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{
    ActionRecord, Alternative, CorrelationEntry, Decision, Disposition, Severity, SituationSignature,
    Verification,
};
use crate::knowledge::{KnowledgeBase, ModelParams};
use crate::ports::{Clock, IdGenerator};

const SUCCESS_INDICATORS: [&str; 5] = ["success", "passed", "completed", "fixed", "ok"];
const FAILURE_INDICATORS: [&str; 5] = ["failed", "error", "timeout", "crashed", "panic"];

pub struct DecisionEngine {
    knowledge: KnowledgeBase,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl DecisionEngine {
    pub fn new(knowledge: KnowledgeBase, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            knowledge,
            clock,
            ids,
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn classify(&self, text: &str, severity: Option<Severity>) -> SituationSignature {
        self.knowledge.params().taxonomy.classify(text, severity)
    }

    /// Accept either a literal `category:severity` signature or free text.
    pub fn signature_for(&self, input: &str, severity: Option<Severity>) -> SituationSignature {
        match input.parse::<SituationSignature>() {
            Ok(sig) => severity.map_or(sig, |s| SituationSignature::new(sig.category, s)),
            Err(_) => self.classify(input, severity),
        }
    }

    pub fn evaluate(&self, situation: &str, severity: Option<Severity>) -> Decision {
        let params = self.knowledge.params();
        let signature = params.taxonomy.classify(situation, severity);
        self.decide(signature, &params)
    }

    pub fn evaluate_signature(&self, signature: SituationSignature) -> Decision {
        self.decide(signature, &self.knowledge.params())
    }

    fn decide(&self, signature: SituationSignature, params: &ModelParams) -> Decision {
        let entries = match self.knowledge.correlations_for(signature) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%signature, error = %err, "correlations unavailable, using fallback");
                Vec::new()
            }
        };

        let decision = match entries.split_first() {
            None => fallback(signature, params),
            Some((best, rest)) => ranked(signature, best, rest, params),
        };
        info!(
            %signature,
            action = %decision.action,
            confidence = decision.confidence,
            disposition = ?decision.disposition,
            "situation evaluated"
        );
        decision
    }

    /// Record what happened when `action` was tried. Persistence failures are
    /// logged, never returned; the return value says whether both writes landed.
    pub fn record_outcome(
        &self,
        signature: SituationSignature,
        action: &str,
        success: bool,
        duration: Duration,
    ) -> bool {
        let mut persisted = true;

        if let Err(err) = self.knowledge.update(signature, action, success) {
            warn!(%signature, action, error = %err, "failed to update correlation");
            persisted = false;
        }

        let record = ActionRecord {
            action_id: self.ids.generate_action_id(),
            situation_signature: signature,
            action: action.to_string(),
            success,
            duration_ms: duration.as_millis().min(u64::MAX as u128) as u64,
            timestamp: self.clock.now(),
        };
        if let Err(err) = self.knowledge.append(&record) {
            warn!(%signature, action, error = %err, "failed to append action history");
            persisted = false;
        }

        persisted
    }

    /// Judge from before/after observations whether an action worked.
    pub fn verify_outcome(&self, before: &str, after: &str) -> Verification {
        verify(before, after)
    }
}

fn fallback(signature: SituationSignature, params: &ModelParams) -> Decision {
    let action = params.fallback_action(signature.category).to_string();
    let confidence = params.scoring.unknown_base.clamp(0.0, 1.0);
    // no history: never auto-execute, whatever the thresholds say
    let disposition = if confidence >= params.suggest_threshold {
        Disposition::Suggest
    } else {
        Disposition::Manual
    };
    let alternatives = params
        .heuristic_alternatives(signature.category)
        .iter()
        .filter(|alt| alt.action != action)
        .take(params.scoring.max_alternatives)
        .map(|alt| Alternative {
            action: alt.action.clone(),
            confidence: alt.confidence.clamp(0.0, 1.0),
        })
        .collect();
    Decision {
        signature,
        reasoning: format!("no history for {signature}, conservative default for {} failures", signature.category),
        action,
        confidence,
        disposition,
        alternatives,
        known: false,
    }
}

fn ranked(
    signature: SituationSignature,
    best: &CorrelationEntry,
    rest: &[CorrelationEntry],
    params: &ModelParams,
) -> Decision {
    let score = |entry: &CorrelationEntry| {
        score_confidence(
            &ScoreInputs {
                known: true,
                action: Some(ActionStats {
                    success_rate: entry.success_rate,
                    occurrences: entry.occurrences,
                }),
                severity: signature.severity,
            },
            &params.scoring,
        )
    };

    let confidence = score(best);
    let disposition = if confidence >= params.auto_execute_threshold {
        Disposition::AutoExecute
    } else if confidence >= params.suggest_threshold {
        Disposition::Suggest
    } else {
        Disposition::Manual
    };

    let alternatives = if disposition == Disposition::Suggest {
        rest.iter()
            .take(params.scoring.max_alternatives)
            .map(|entry| Alternative {
                action: entry.action.clone(),
                confidence: score(entry),
            })
            .collect()
    } else {
        Vec::new()
    };

    Decision {
        signature,
        action: best.action.clone(),
        confidence,
        disposition,
        alternatives,
        reasoning: format!(
            "{} succeeded at rate {:.2} over {} attempts for {signature}",
            best.action, best.success_rate, best.occurrences
        ),
        known: true,
    }
}

fn verify(before: &str, after: &str) -> Verification {
    let words: Vec<String> = after
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    let present = |indicator: &&str| words.iter().any(|w| w.starts_with(indicator));

    let success_indicators = SUCCESS_INDICATORS.into_iter().filter(present).count();
    let failure_indicators = FAILURE_INDICATORS.into_iter().filter(present).count();
    let state_changed = before.trim() != after.trim();

    let (success, confidence, explanation) = if success_indicators > failure_indicators {
        (
            true,
            0.7 + (0.1 * success_indicators as f64).min(0.2),
            format!("{success_indicators} success indicators outweigh {failure_indicators} failure indicators"),
        )
    } else if failure_indicators > success_indicators {
        (
            false,
            0.7 + (0.1 * failure_indicators as f64).min(0.2),
            format!("{failure_indicators} failure indicators outweigh {success_indicators} success indicators"),
        )
    } else {
        (
            state_changed,
            0.5,
            if state_changed {
                "indicators inconclusive, state changed".to_string()
            } else {
                "indicators inconclusive, state unchanged".to_string()
            },
        )
    };

    Verification {
        success,
        confidence,
        explanation,
        success_indicators,
        failure_indicators,
        state_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;
    use crate::ports::{FixedClock, UlidGenerator};
    use crate::store::RetryPolicy;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::path::Path;

    fn engine(dir: &Path) -> DecisionEngine {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        DecisionEngine::new(
            KnowledgeBase::open(dir, clock.clone(), RetryPolicy::default()),
            clock,
            ids,
        )
    }

    #[test]
    fn unknown_situation_falls_back_to_manual() {
        let dir = tempfile::tempdir().unwrap();
        let decision = engine(dir.path()).evaluate("Unknown error xyz", None);

        assert!(!decision.known);
        assert!((decision.confidence - 0.3).abs() < 1e-9);
        assert_eq!(decision.disposition, Disposition::Manual);
        assert_eq!(decision.action, "analyze_and_log");
        assert_eq!(decision.signature.category, Category::Unknown);
    }

    #[test]
    fn unknown_high_severity_is_still_base_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let decision = engine(dir.path()).evaluate("SwiftLint crashed: fatal", None);

        assert_eq!(decision.signature, SituationSignature::new(Category::Lint, Severity::High));
        assert_eq!(decision.action, "fix_format");
        assert!((decision.confidence - 0.3).abs() < 1e-9);
        assert!(!decision.auto_execute());
    }

    #[test]
    fn fallback_offers_heuristic_alternatives_without_auto_executing() {
        let dir = tempfile::tempdir().unwrap();
        let decision = engine(dir.path()).evaluate("build failed: linker error", None);

        assert!(!decision.known);
        assert_eq!(decision.action, "rebuild");
        assert_eq!(decision.disposition, Disposition::Manual);
        assert!(!decision.auto_execute());
        let offered: Vec<(&str, f64)> = decision
            .alternatives
            .iter()
            .map(|a| (a.action.as_str(), a.confidence))
            .collect();
        assert_eq!(offered, [("clean_build", 0.6), ("update_dependencies", 0.4)]);

        // the lint heuristic is the fallback action itself
        let lint = engine(dir.path()).evaluate("SwiftLint violation", None);
        assert_eq!(lint.action, "fix_format");
        assert!(lint.alternatives.is_empty());
    }

    #[test]
    fn fallback_alternatives_respect_the_cap() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("model_params.json"),
            r#"{"scoring": {"max_alternatives": 1}, "heuristic_alternatives": {"test": [
                {"action": "rebuild", "confidence": 0.5},
                {"action": "clean_build", "confidence": 0.4},
                {"action": "skip", "confidence": 0.2}
            ]}}"#,
        )
        .unwrap();
        let decision = engine(dir.path()).evaluate_signature(SituationSignature::new(Category::Test, Severity::High));

        assert_eq!(decision.action, "rerun_tests");
        assert!(!decision.auto_execute());
        assert_eq!(decision.alternatives.len(), 1);
        assert_eq!(decision.alternatives[0].action, "rebuild");
    }

    #[test]
    fn learned_success_leads_to_auto_execution() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let sig = engine.signature_for("build:medium", None);

        for _ in 0..10 {
            assert!(engine.record_outcome(sig, "clean_build", true, Duration::from_secs(30)));
        }
        engine.record_outcome(sig, "rebuild", false, Duration::from_secs(5));

        let decision = engine.evaluate("build failed in module Foo", None);
        assert!(decision.known);
        assert_eq!(decision.action, "clean_build");
        assert_eq!(decision.disposition, Disposition::AutoExecute);
        assert!(decision.alternatives.is_empty());
        assert_eq!(engine.knowledge().history().unwrap().len(), 11);
    }

    #[test]
    fn middling_history_suggests_with_alternatives() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let sig = SituationSignature::new(Category::Test, Severity::Medium);

        // one success each: 0.5 + 0.075 + 0.015 = 0.59
        for action in ["rerun_tests", "clean_build", "rebuild", "reset_simulator", "skip"] {
            engine.record_outcome(sig, action, true, Duration::ZERO);
        }

        let decision = engine.evaluate_signature(sig);
        assert_eq!(decision.disposition, Disposition::Suggest);
        assert_eq!(decision.alternatives.len(), 3);
        assert!(decision.alternatives.iter().all(|a| a.action != decision.action));
    }

    #[test]
    fn repeated_outcomes_move_rate_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let sig = SituationSignature::new(Category::Dependency, Severity::Low);

        let mut last = 0.5;
        for _ in 0..30 {
            engine.record_outcome(sig, "update_dependencies", true, Duration::ZERO);
            let rate = engine.knowledge().correlations_for(sig).unwrap()[0].success_rate;
            assert!(rate >= last);
            last = rate;
        }
        assert!(last > 0.99);

        for _ in 0..30 {
            engine.record_outcome(sig, "update_dependencies", false, Duration::ZERO);
            let rate = engine.knowledge().correlations_for(sig).unwrap()[0].success_rate;
            assert!(rate <= last);
            last = rate;
        }
        assert!(last < 0.01);
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        fs::write(
            dir.path().join(crate::knowledge::MODEL_PARAMS_FILE),
            r#"{"scoring": {"known_base": 1.0, "high_severity_boost": 0.9}}"#,
        )
        .unwrap();
        let sig = SituationSignature::new(Category::Build, Severity::High);
        engine.record_outcome(sig, "rebuild", true, Duration::ZERO);

        for text in ["fatal build crash", "Unknown error xyz", "", "build"] {
            let c = engine.evaluate(text, None).confidence;
            assert!((0.0..=1.0).contains(&c), "{text:?} scored {c}");
        }
    }

    #[test]
    fn record_outcome_swallows_persistence_failures() {
        let dir = tempfile::tempdir().unwrap();
        // a file where the knowledge directory should be
        let blocked = dir.path().join("knowledge");
        fs::write(&blocked, "not a directory").unwrap();
        let engine = engine(&blocked);

        let sig = SituationSignature::new(Category::Build, Severity::Low);
        assert!(!engine.record_outcome(sig, "rebuild", true, Duration::from_secs(1)));
        assert!(!engine.evaluate("build failed", None).known);
    }

    #[test]
    fn signature_for_accepts_literal_or_text() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        assert_eq!(
            engine.signature_for("lint:low", None),
            SituationSignature::new(Category::Lint, Severity::Low)
        );
        assert_eq!(
            engine.signature_for("lint:low", Some(Severity::High)),
            SituationSignature::new(Category::Lint, Severity::High)
        );
        assert_eq!(
            engine.signature_for("tests failed", None),
            SituationSignature::new(Category::Test, Severity::Medium)
        );
    }

    #[test]
    fn verify_counts_indicators() {
        let v = verify("build failed", "Build completed, all tests passed");
        assert!(v.success);
        assert_eq!(v.success_indicators, 2);
        assert!((v.confidence - 0.9).abs() < 1e-9);

        let v = verify("", "error: linker failed with timeout");
        assert!(!v.success);
        assert_eq!(v.failure_indicators, 3);
        assert!((v.confidence - 0.9).abs() < 1e-9);

        let v = verify("step 1", "step 2");
        assert!(v.success && v.state_changed);
        assert_eq!(v.confidence, 0.5);

        let v = verify("same", "same");
        assert!(!v.success);
    }
}
