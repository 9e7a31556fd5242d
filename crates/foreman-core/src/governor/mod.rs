//! FallbackGovernor: may this failure escalate to the costlier resource?
//!
//! Fail safe throughout. Anything the governor cannot read or persist reliably
//! (policy, its own state) turns into a denial with a reason, never an error.
//! Every decision is appended to the audit log.

mod audit;
mod breaker;
mod policy;
mod quota;

pub use audit::EscalationAuditRecord;
pub use breaker::{BreakerPhase, CircuitBreakerState, Gate};
pub use policy::{BreakerPolicy, ClassPolicy, FallbackPolicy, MAX_BREAKER_MINUTES, QuotaPolicy, normalize_class};
pub use quota::{QuotaRemaining, QuotaState, QuotaWindow};

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ForemanError, Result};
use crate::ports::Clock;
use crate::store::{Document, JsonDocument, JsonLines, Recovery, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    Permitted,
    HalfOpenProbe,
    Disabled,
    PolicyUnavailable,
    NotAllowListed,
    StateUnreadable,
    StateUnwritable,
    HourlyQuotaExhausted,
    DailyQuotaExhausted,
    CircuitOpen,
    HalfOpenProbeInFlight,
}

impl EscalationReason {
    pub fn is_permit(self) -> bool {
        matches!(self, EscalationReason::Permitted | EscalationReason::HalfOpenProbe)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EscalationReason::Permitted => "permitted",
            EscalationReason::HalfOpenProbe => "half_open_probe",
            EscalationReason::Disabled => "disabled",
            EscalationReason::PolicyUnavailable => "policy_unavailable",
            EscalationReason::NotAllowListed => "not_allow_listed",
            EscalationReason::StateUnreadable => "state_unreadable",
            EscalationReason::StateUnwritable => "state_unwritable",
            EscalationReason::HourlyQuotaExhausted => "hourly_quota_exhausted",
            EscalationReason::DailyQuotaExhausted => "daily_quota_exhausted",
            EscalationReason::CircuitOpen => "circuit_open",
            EscalationReason::HalfOpenProbeInFlight => "half_open_probe_in_flight",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub priority_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl EscalationRequest {
    pub fn new(priority_class: impl Into<String>) -> Self {
        Self {
            priority_class: priority_class.into(),
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationDecision {
    pub permitted: bool,
    pub reason: EscalationReason,
    pub quota_remaining: Option<QuotaRemaining>,
}

impl EscalationDecision {
    fn deny(reason: EscalationReason) -> Self {
        Self {
            permitted: false,
            reason,
            quota_remaining: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationOutcome {
    Success,
    Failure,
}

impl FromStr for EscalationOutcome {
    type Err = ForemanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "ok" | "true" => Ok(EscalationOutcome::Success),
            "failure" | "failed" | "error" | "false" => Ok(EscalationOutcome::Failure),
            _ => Err(ForemanError::InvalidArgument {
                field: "outcome",
                value: s.to_string(),
            }),
        }
    }
}

/// Governor bookkeeping (`governor_state.json`), keyed by normalized class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernorState {
    #[serde(default)]
    pub quotas: BTreeMap<String, QuotaState>,
    #[serde(default)]
    pub breakers: BTreeMap<String, CircuitBreakerState>,
}

impl Document for GovernorState {
    const KIND: &'static str = "governor_state";

    fn validate(&self) -> std::result::Result<(), String> {
        for (class, quota) in &self.quotas {
            if quota.priority_class != *class {
                return Err(format!("quota entry {class:?} describes {:?}", quota.priority_class));
            }
            if !quota.is_consistent() {
                return Err(format!("quota for {class} exceeds its limit"));
            }
        }
        for (class, breaker) in &self.breakers {
            if breaker.priority_class != *class {
                return Err(format!("breaker entry {class:?} describes {:?}", breaker.priority_class));
            }
        }
        Ok(())
    }
}

pub struct FallbackGovernor {
    policy: JsonDocument<FallbackPolicy>,
    state: JsonDocument<GovernorState>,
    audit: JsonLines<EscalationAuditRecord>,
    clock: Arc<dyn Clock>,
}

impl FallbackGovernor {
    pub fn open(
        policy_path: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        audit_path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            policy: JsonDocument::new(policy_path, Recovery::Strict, retry.clone()),
            state: JsonDocument::new(state_path, Recovery::Strict, retry.clone()),
            audit: JsonLines::new(audit_path, retry),
            clock,
        }
    }

    pub fn can_escalate(&self, priority_class: &str) -> bool {
        self.evaluate(&EscalationRequest::new(priority_class)).permitted
    }

    /// Decide and, when permitted, consume quota (and the half-open probe).
    pub fn evaluate(&self, request: &EscalationRequest) -> EscalationDecision {
        let class = normalize_class(&request.priority_class);
        let decision = self.decide(&class);

        let record = EscalationAuditRecord {
            timestamp: self.clock.now(),
            signature: request.signature.clone(),
            priority_class: class.clone(),
            permitted: decision.permitted,
            reason: decision.reason,
            quota_remaining: decision.quota_remaining,
        };
        if let Err(err) = self.audit.append(&record) {
            warn!(class = %class, error = %err, "failed to append escalation audit record");
        }

        if decision.permitted {
            info!(class = %class, reason = %decision.reason, "escalation permitted");
        } else {
            info!(class = %class, reason = %decision.reason, "escalation denied");
        }
        decision
    }

    fn decide(&self, class: &str) -> EscalationDecision {
        let policy = match self.load_policy() {
            Ok(policy) => policy,
            Err(reason) => return EscalationDecision::deny(reason),
        };
        if !policy.is_allowed(class) {
            return EscalationDecision::deny(EscalationReason::NotAllowListed);
        }
        let class_policy = policy.class_policy(class).clone();
        let now = self.clock.now();

        let mut computed: Option<EscalationDecision> = None;
        let result = self.state.update_if_changed(|state| {
            let quota = state
                .quotas
                .entry(class.to_string())
                .or_insert_with(|| QuotaState::new(class, &class_policy.quota, now));
            quota.refresh(&class_policy.quota, now);

            if let Some(reason) = quota.exhausted() {
                let decision = EscalationDecision {
                    permitted: false,
                    reason,
                    quota_remaining: Some(quota.remaining()),
                };
                computed = Some(decision.clone());
                return (decision, false);
            }

            let breaker = state
                .breakers
                .entry(class.to_string())
                .or_insert_with(|| CircuitBreakerState::new(class));
            let reason = match breaker.gate(now, &class_policy.breaker) {
                Gate::Pass => EscalationReason::Permitted,
                Gate::Probe => {
                    breaker.begin_probe(now);
                    EscalationReason::HalfOpenProbe
                }
                Gate::Open => EscalationReason::CircuitOpen,
                Gate::ProbeInFlight => EscalationReason::HalfOpenProbeInFlight,
            };

            let permitted = reason.is_permit();
            if permitted {
                quota.consume();
            }
            let decision = EscalationDecision {
                permitted,
                reason,
                quota_remaining: Some(quota.remaining()),
            };
            computed = Some(decision.clone());
            (decision, permitted)
        });

        match result {
            Ok(decision) => decision,
            Err(err) => match computed {
                Some(intended) if intended.permitted => {
                    warn!(class, error = %err, "could not persist escalation state, denying");
                    EscalationDecision::deny(EscalationReason::StateUnwritable)
                }
                _ => {
                    warn!(class, error = %err, "escalation state unreadable, denying");
                    EscalationDecision::deny(EscalationReason::StateUnreadable)
                }
            },
        }
    }

    fn load_policy(&self) -> std::result::Result<FallbackPolicy, EscalationReason> {
        if !self.policy.path().exists() {
            warn!(path = %self.policy.path().display(), "no escalation policy, denying");
            return Err(EscalationReason::PolicyUnavailable);
        }
        match self.policy.read() {
            Ok(policy) if policy.enabled => Ok(policy),
            Ok(_) => Err(EscalationReason::Disabled),
            Err(err) => {
                warn!(error = %err, "escalation policy unreadable, denying");
                Err(EscalationReason::PolicyUnavailable)
            }
        }
    }

    /// Feed the result of an escalation back into the class breaker.
    pub fn record_escalation(&self, priority_class: &str, outcome: EscalationOutcome) -> Result<CircuitBreakerState> {
        let class = normalize_class(priority_class);
        if class.is_empty() {
            return Err(ForemanError::InvalidArgument {
                field: "priority_class",
                value: priority_class.to_string(),
            });
        }
        let breaker_policy = self
            .load_policy()
            .map(|p| p.class_policy(&class).breaker.clone())
            .unwrap_or_default();
        let now = self.clock.now();

        let breaker = self.state.update(|state| {
            let breaker = state
                .breakers
                .entry(class.clone())
                .or_insert_with(|| CircuitBreakerState::new(&class));
            match outcome {
                EscalationOutcome::Success => breaker.record_success(),
                EscalationOutcome::Failure => breaker.record_failure(now, &breaker_policy),
            }
            breaker.clone()
        })?;

        info!(class = %class, ?outcome, phase = ?breaker.phase, failures = breaker.failure_count, "escalation outcome recorded");
        Ok(breaker)
    }

    pub fn state(&self) -> Result<GovernorState> {
        self.state.read()
    }

    pub fn audit_log(&self) -> Result<Vec<EscalationAuditRecord>> {
        self.audit.read_all()
    }
}
