use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EscalationReason;
use super::quota::QuotaRemaining;

/// One line of `escalations.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationAuditRecord {
    pub timestamp: DateTime<Utc>,
    pub signature: Option<String>,
    pub priority_class: String,
    pub permitted: bool,
    pub reason: EscalationReason,
    pub quota_remaining: Option<QuotaRemaining>,
}
