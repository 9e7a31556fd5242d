//! Externally supplied escalation policy (`fallback_policy.json`).

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::store::Document;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerPolicy {
    /// Failures within one window that open the breaker.
    pub failure_threshold: u32,
    pub window_minutes: i64,
    pub cooldown_minutes: i64,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_minutes: 60,
            cooldown_minutes: 30,
        }
    }
}

/// Upper bound for breaker windows and cooldowns: ten years.
pub const MAX_BREAKER_MINUTES: i64 = 10 * 366 * 24 * 60;

impl BreakerPolicy {
    /// Clamped to [`MAX_BREAKER_MINUTES`] so date arithmetic stays in range.
    pub fn window(&self) -> Duration {
        bounded_minutes(self.window_minutes)
    }

    pub fn cooldown(&self) -> Duration {
        bounded_minutes(self.cooldown_minutes)
    }
}

fn bounded_minutes(minutes: i64) -> Duration {
    Duration::minutes(minutes.clamp(-MAX_BREAKER_MINUTES, MAX_BREAKER_MINUTES))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    pub hourly: u32,
    pub daily: u32,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self { hourly: 10, daily: 50 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassPolicy {
    pub breaker: BreakerPolicy,
    pub quota: QuotaPolicy,
}

/// An absent file reads as a disabled, empty policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackPolicy {
    pub enabled: bool,
    pub allowed_priority_classes: Vec<String>,
    /// Applies to allow-listed classes without their own entry.
    pub defaults: ClassPolicy,
    pub classes: BTreeMap<String, ClassPolicy>,
}

impl FallbackPolicy {
    pub fn is_allowed(&self, class: &str) -> bool {
        let class = normalize_class(class);
        !class.is_empty()
            && self
                .allowed_priority_classes
                .iter()
                .any(|allowed| normalize_class(allowed) == class)
    }

    pub fn class_policy(&self, class: &str) -> &ClassPolicy {
        let class = normalize_class(class);
        self.classes
            .iter()
            .find(|(name, _)| normalize_class(name) == class)
            .map(|(_, policy)| policy)
            .unwrap_or(&self.defaults)
    }
}

impl Document for FallbackPolicy {
    const KIND: &'static str = "fallback_policy";

    fn validate(&self) -> std::result::Result<(), String> {
        for (name, policy) in std::iter::once(("defaults", &self.defaults))
            .chain(self.classes.iter().map(|(n, p)| (n.as_str(), p)))
        {
            let b = &policy.breaker;
            if b.failure_threshold == 0 {
                return Err(format!("{name}: failure_threshold must be at least 1"));
            }
            if b.window_minutes <= 0 || b.cooldown_minutes <= 0 {
                return Err(format!("{name}: breaker windows must be positive"));
            }
            if b.window_minutes > MAX_BREAKER_MINUTES || b.cooldown_minutes > MAX_BREAKER_MINUTES {
                return Err(format!("{name}: breaker windows must not exceed {MAX_BREAKER_MINUTES} minutes"));
            }
        }
        if self.allowed_priority_classes.iter().any(|c| c.trim().is_empty()) {
            return Err("empty priority class in allow-list".to_string());
        }
        Ok(())
    }
}

/// Priority classes compare trimmed and case-insensitively.
pub fn normalize_class(class: &str) -> String {
    class.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_overrides_fall_back_to_defaults() {
        let policy: FallbackPolicy = serde_json::from_str(
            r#"{
                "enabled": true,
                "allowed_priority_classes": ["critical", "High"],
                "defaults": {"quota": {"hourly": 2, "daily": 4}},
                "classes": {"critical": {"quota": {"hourly": 9}}}
            }"#,
        )
        .unwrap();

        assert!(policy.is_allowed("high"));
        assert!(policy.is_allowed(" CRITICAL "));
        assert!(!policy.is_allowed("low"));
        assert!(!policy.is_allowed(""));

        assert_eq!(policy.class_policy("critical").quota.hourly, 9);
        assert_eq!(policy.class_policy("critical").quota.daily, 50);
        assert_eq!(policy.class_policy("high").quota.hourly, 2);
        assert_eq!(policy.class_policy("high").breaker, BreakerPolicy::default());
        assert_eq!(policy.validate(), Ok(()));
    }

    #[test]
    fn zero_threshold_is_invalid() {
        let mut policy = FallbackPolicy::default();
        policy.defaults.breaker.failure_threshold = 0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn oversized_cooldown_is_invalid_and_clamped() {
        let policy: FallbackPolicy = serde_json::from_str(
            r#"{"enabled": true, "classes": {"high": {"breaker": {"cooldown_minutes": 1000000000000}}}}"#,
        )
        .unwrap();
        assert!(policy.validate().is_err());

        let breaker = &policy.class_policy("high").breaker;
        assert_eq!(breaker.cooldown(), Duration::minutes(MAX_BREAKER_MINUTES));
        assert_eq!(breaker.window(), Duration::minutes(60));
    }
}
