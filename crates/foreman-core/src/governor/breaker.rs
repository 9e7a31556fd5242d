//! Per-class circuit breaker.
//!
//! ```text
//! closed ──(threshold failures in window)──▶ open
//! open ──(now ≥ reopen_at)──▶ half_open
//! half_open ──success──▶ closed
//! half_open ──failure──▶ open (fresh reopen_at)
//! ```
//!
//! Half-open admits a single probe. A probe that never reports back is
//! considered abandoned after one cooldown and another probe is admitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::policy::BreakerPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

/// What the breaker says about one escalation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Pass,
    Probe,
    Open,
    ProbeInFlight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub priority_class: String,
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
    pub phase: BreakerPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reopen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub probe_in_flight: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_started_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    pub fn new(priority_class: &str) -> Self {
        Self {
            priority_class: priority_class.to_string(),
            failure_count: 0,
            window_start: None,
            phase: BreakerPhase::Closed,
            reopen_at: None,
            probe_in_flight: false,
            probe_started_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.phase == BreakerPhase::Open
    }

    /// Decide whether a request may pass, moving open → half_open once the
    /// cooldown has elapsed. Does not start a probe; see [`begin_probe`](Self::begin_probe).
    pub fn gate(&mut self, now: DateTime<Utc>, policy: &BreakerPolicy) -> Gate {
        if self.phase == BreakerPhase::Open && self.reopen_at.is_none_or(|at| now >= at) {
            self.phase = BreakerPhase::HalfOpen;
            self.probe_in_flight = false;
            self.probe_started_at = None;
        }

        match self.phase {
            BreakerPhase::Closed => Gate::Pass,
            BreakerPhase::Open => Gate::Open,
            BreakerPhase::HalfOpen => {
                let abandoned = self
                    .probe_started_at
                    .and_then(|started| started.checked_add_signed(policy.cooldown()))
                    .is_some_and(|deadline| now >= deadline);
                if self.probe_in_flight && !abandoned {
                    Gate::ProbeInFlight
                } else {
                    Gate::Probe
                }
            }
        }
    }

    pub fn begin_probe(&mut self, now: DateTime<Utc>) {
        self.probe_in_flight = true;
        self.probe_started_at = Some(now);
    }

    pub fn record_success(&mut self) {
        if self.phase == BreakerPhase::HalfOpen {
            info!(class = %self.priority_class, "probe succeeded, breaker closed");
        }
        if self.phase != BreakerPhase::Open {
            self.close();
        }
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &BreakerPolicy) {
        match self.phase {
            BreakerPhase::HalfOpen => self.trip(now, policy),
            BreakerPhase::Closed => {
                // a window end past the representable range never elapses
                let window_elapsed = self.window_start.is_none_or(|start| {
                    now < start
                        || start
                            .checked_add_signed(policy.window())
                            .is_some_and(|end| now >= end)
                });
                if window_elapsed {
                    self.window_start = Some(now);
                    self.failure_count = 0;
                }
                self.failure_count += 1;
                if self.failure_count >= policy.failure_threshold.max(1) {
                    self.trip(now, policy);
                }
            }
            BreakerPhase::Open => {}
        }
    }

    fn trip(&mut self, now: DateTime<Utc>, policy: &BreakerPolicy) {
        // overflow means the breaker stays open
        let reopen_at = now
            .checked_add_signed(policy.cooldown())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        warn!(
            class = %self.priority_class,
            failures = self.failure_count,
            %reopen_at,
            "breaker opened"
        );
        self.phase = BreakerPhase::Open;
        self.reopen_at = Some(reopen_at);
        self.probe_in_flight = false;
        self.probe_started_at = None;
    }

    fn close(&mut self) {
        self.phase = BreakerPhase::Closed;
        self.failure_count = 0;
        self.window_start = None;
        self.reopen_at = None;
        self.probe_in_flight = false;
        self.probe_started_at = None;
    }
}
