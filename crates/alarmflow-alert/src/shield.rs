use alarmflow_common::alert::Alert;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Decides which shields currently cover an alert.
pub trait ShieldMatcher: Send + Sync {
    /// Ids of the active shields matching `alert` at `now`; empty when the
    /// alert is not shielded.
    fn match_alert(&self, alert: &Alert, now: DateTime<Utc>) -> Vec<String>;
}

/// A time-bounded shield over alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldRule {
    pub id: String,
    #[serde(default)]
    pub biz_id: Option<i64>,
    /// Empty means every strategy.
    #[serde(default)]
    pub strategy_ids: Vec<i64>,
    /// Dimension name -> glob pattern (e.g. `"10.0.*"`). Every pattern must
    /// match.
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    pub begin_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl ShieldRule {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.begin_time <= now && self.end_time.map_or(true, |end| now < end)
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        if self.biz_id.is_some_and(|biz| biz != alert.biz_id) {
            return false;
        }
        if !self.strategy_ids.is_empty()
            && !alert
                .strategy_id
                .is_some_and(|sid| self.strategy_ids.contains(&sid))
        {
            return false;
        }
        self.dimensions.iter().all(|(key, pattern)| {
            let value = match key.as_str() {
                "target_ip" => Some(alert.target_ip.as_str()),
                _ => alert.dimensions.get(key).map(String::as_str),
            };
            value.is_some_and(|v| pattern == "*" || glob_match::glob_match(pattern, v))
        })
    }
}

/// In-memory shield rules, replaceable at runtime.
#[derive(Default)]
pub struct ShieldRuleSet {
    rules: RwLock<Vec<ShieldRule>>,
}

impl ShieldRuleSet {
    pub fn new(rules: Vec<ShieldRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn replace(&self, rules: Vec<ShieldRule>) {
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;
    }

    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ShieldMatcher for ShieldRuleSet {
    fn match_alert(&self, alert: &Alert, now: DateTime<Utc>) -> Vec<String> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|rule| rule.is_active(now) && rule.matches(alert))
            .map(|rule| rule.id.clone())
            .collect()
    }
}
