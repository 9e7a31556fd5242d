//! Hourly and daily escalation budgets per priority class.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::policy::QuotaPolicy;
use super::EscalationReason;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaWindow {
    pub used: u32,
    pub limit: u32,
    pub window_start: DateTime<Utc>,
}

impl QuotaWindow {
    fn new(limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            used: 0,
            limit,
            window_start: now,
        }
    }

    /// Start a fresh window once the current one has elapsed, and pick up the
    /// current limit.
    fn refresh(&mut self, length: Duration, limit: u32, now: DateTime<Utc>) {
        if now >= self.window_start + length || now < self.window_start {
            self.used = 0;
            self.window_start = now;
        }
        self.limit = limit;
        self.used = self.used.min(limit);
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    pub fn exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    pub priority_class: String,
    pub hourly: QuotaWindow,
    pub daily: QuotaWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRemaining {
    pub hourly: u32,
    pub daily: u32,
}

impl QuotaState {
    pub fn new(priority_class: &str, policy: &QuotaPolicy, now: DateTime<Utc>) -> Self {
        Self {
            priority_class: priority_class.to_string(),
            hourly: QuotaWindow::new(policy.hourly, now),
            daily: QuotaWindow::new(policy.daily, now),
        }
    }

    pub fn refresh(&mut self, policy: &QuotaPolicy, now: DateTime<Utc>) {
        self.hourly.refresh(Duration::hours(1), policy.hourly, now);
        self.daily.refresh(Duration::days(1), policy.daily, now);
    }

    pub fn exhausted(&self) -> Option<EscalationReason> {
        if self.hourly.exhausted() {
            Some(EscalationReason::HourlyQuotaExhausted)
        } else if self.daily.exhausted() {
            Some(EscalationReason::DailyQuotaExhausted)
        } else {
            None
        }
    }

    pub fn consume(&mut self) {
        self.hourly.used += 1;
        self.daily.used += 1;
    }

    pub fn remaining(&self) -> QuotaRemaining {
        QuotaRemaining {
            hourly: self.hourly.remaining(),
            daily: self.daily.remaining(),
        }
    }

    pub(super) fn is_consistent(&self) -> bool {
        self.hourly.used <= self.hourly.limit && self.daily.used <= self.daily.limit
    }
}
