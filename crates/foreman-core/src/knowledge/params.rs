//! Tunable model parameters (`model_params.json`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::decision::{ScoringCoefficients, Taxonomy};
use crate::domain::{Alternative, Category};
use crate::store::Document;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub learning_rate: f64,
    pub auto_execute_threshold: f64,
    pub suggest_threshold: f64,
    pub scoring: ScoringCoefficients,
    pub taxonomy: Taxonomy,
    /// Conservative action per category for signatures with no history.
    pub fallback_actions: BTreeMap<Category, String>,
    /// Untested candidates offered next to the fallback action.
    pub heuristic_alternatives: BTreeMap<Category, Vec<Alternative>>,
}

impl Default for ModelParams {
    fn default() -> Self {
        let fallback_actions = [
            (Category::Build, "rebuild"),
            (Category::Test, "rerun_tests"),
            (Category::Lint, "fix_format"),
            (Category::Dependency, "update_dependencies"),
            (Category::Unknown, "analyze_and_log"),
        ]
        .into_iter()
        .map(|(c, a)| (c, a.to_string()))
        .collect();

        let heuristic_alternatives = [
            (Category::Build, vec![("clean_build", 0.6), ("update_dependencies", 0.4)]),
            (Category::Test, vec![("rebuild", 0.5), ("clean_build", 0.4)]),
            (Category::Lint, vec![("fix_format", 0.5)]),
            (Category::Dependency, vec![("rebuild", 0.5)]),
            (Category::Unknown, vec![("skip", 0.3)]),
        ]
        .into_iter()
        .map(|(c, alts)| {
            let alts = alts
                .into_iter()
                .map(|(action, confidence)| Alternative {
                    action: action.to_string(),
                    confidence,
                })
                .collect();
            (c, alts)
        })
        .collect();

        Self {
            learning_rate: 0.15,
            auto_execute_threshold: 0.75,
            suggest_threshold: 0.50,
            scoring: ScoringCoefficients::default(),
            taxonomy: Taxonomy::default(),
            fallback_actions,
            heuristic_alternatives,
        }
    }
}

impl ModelParams {
    pub fn fallback_action(&self, category: Category) -> &str {
        self.fallback_actions
            .get(&category)
            .or_else(|| self.fallback_actions.get(&Category::Unknown))
            .map(String::as_str)
            .unwrap_or("analyze_and_log")
    }

    pub fn heuristic_alternatives(&self, category: Category) -> &[Alternative] {
        self.heuristic_alternatives
            .get(&category)
            .or_else(|| self.heuristic_alternatives.get(&Category::Unknown))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Document for ModelParams {
    const KIND: &'static str = "model_params";

    fn validate(&self) -> std::result::Result<(), String> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(format!("learning_rate {} outside (0, 1]", self.learning_rate));
        }
        let unit = 0.0..=1.0;
        if !unit.contains(&self.suggest_threshold) || !unit.contains(&self.auto_execute_threshold) {
            return Err("thresholds must lie in [0, 1]".to_string());
        }
        if self.suggest_threshold >= self.auto_execute_threshold {
            return Err(format!(
                "suggest_threshold {} must be below auto_execute_threshold {}",
                self.suggest_threshold, self.auto_execute_threshold
            ));
        }
        let k = &self.scoring;
        if !unit.contains(&k.known_base) || !unit.contains(&k.unknown_base) {
            return Err("scoring bases must lie in [0, 1]".to_string());
        }
        if k.occurrence_saturation_point <= 0.0 {
            return Err("occurrence_saturation_point must be positive".to_string());
        }
        let stray = self
            .heuristic_alternatives
            .values()
            .flatten()
            .find(|alt| !unit.contains(&alt.confidence));
        if let Some(alt) = stray {
            return Err(format!("heuristic confidence {} for {} outside [0, 1]", alt.confidence, alt.action));
        }
        Ok(())
    }
}
