//! Decision model: what the engine recommends for an observed failure.

use serde::{Deserialize, Serialize};

use super::situation::SituationSignature;

/// How a caller should act on a decision.
///
/// - `AutoExecute`: confident enough to run the action unattended.
/// - `Suggest`: run only with review; ranked alternatives are attached.
/// - `Manual`: hand the situation to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    AutoExecute,
    Suggest,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub action: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub signature: SituationSignature,
    pub action: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub disposition: Disposition,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<Alternative>,
    pub reasoning: String,
    /// Whether any history exists for the signature.
    pub known: bool,
}

impl Decision {
    pub fn auto_execute(&self) -> bool {
        self.disposition == Disposition::AutoExecute
    }
}

/// Verdict on whether an executed action worked, inferred from output text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub success: bool,
    pub confidence: f64,
    pub explanation: String,
    pub success_indicators: usize,
    pub failure_indicators: usize,
    pub state_changed: bool,
}
