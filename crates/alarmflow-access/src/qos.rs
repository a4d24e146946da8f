use alarmflow_common::action::{AlertLog, AlertLogOp};
use alarmflow_common::hash;
use alarmflow_common::types::{Record, Severity};
use alarmflow_storage::KvStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosSettings {
    /// Signals per fingerprint allowed within one window.
    #[serde(default = "default_threshold")]
    pub threshold: i64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// The gate is active only while this key exists.
    #[serde(default = "default_switch_key")]
    pub switch_key: String,
}

impl Default for QosSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            window_secs: default_window_secs(),
            switch_key: default_switch_key(),
        }
    }
}

fn default_threshold() -> i64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_switch_key() -> String {
    "alarm.qos.switch".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosVerdict {
    /// Switch key absent: the gate is a no-op.
    Disabled,
    Passed { count: i64 },
    Dropped { count: i64 },
    /// The counter could not be incremented; the signal is kept.
    FailedOpen,
}

/// Fingerprint of one exact alarm: business, strategy, item, target, level.
pub fn fingerprint(
    biz_id: i64,
    strategy_id: i64,
    item_id: i64,
    target_ip: &str,
    severity: Severity,
) -> String {
    hash::digest(&[
        biz_id.to_string(),
        strategy_id.to_string(),
        item_id.to_string(),
        target_ip.to_string(),
        severity.level().to_string(),
    ])
}

/// Hard cap on signals per alarm fingerprint, applied after priority and
/// regardless of convergence: the last-resort circuit breaker.
pub struct QosFloodControl {
    kv: Arc<dyn KvStore>,
    settings: QosSettings,
}

impl QosFloodControl {
    pub fn new(kv: Arc<dyn KvStore>, settings: QosSettings) -> Self {
        Self { kv, settings }
    }

    pub fn settings(&self) -> &QosSettings {
        &self.settings
    }

    pub async fn is_enabled(&self) -> bool {
        match self.kv.exists(&self.settings.switch_key).await {
            Ok(enabled) => enabled,
            Err(e) => {
                tracing::warn!(error = %e, "QoS switch unreadable, gate disabled");
                false
            }
        }
    }

    async fn count(&self, fingerprint: &str) -> QosVerdict {
        let key = format!("alarm.qos.{fingerprint}");
        match self.kv.incr(&key).await {
            Ok(count) => {
                // Checked on every increment so a counter whose first EXPIRE
                // failed still gets its window.
                if let Err(e) = self.kv.expire_nx(&key, self.settings.window_secs).await {
                    tracing::warn!(key = %key, error = %e, "Failed to set QoS counter TTL");
                }
                if count > self.settings.threshold {
                    QosVerdict::Dropped { count }
                } else {
                    QosVerdict::Passed { count }
                }
            }
            Err(e) => {
                tracing::warn!(fingerprint, error = %e, "QoS counter increment failed, signal kept");
                QosVerdict::FailedOpen
            }
        }
    }

    /// Counts one signal for a fingerprint outside the record path (e.g.
    /// shield-triggered notices).
    pub async fn admit(&self, fingerprint: &str) -> QosVerdict {
        if !self.is_enabled().await {
            return QosVerdict::Disabled;
        }
        self.count(fingerprint).await
    }

    /// Drops every retained, non-inhibited item whose fingerprint exceeded
    /// the threshold, then removes records left without active items.
    ///
    /// Returns whether the gate was active, plus one audit entry per drop.
    pub async fn filter_records(
        &self,
        records: &mut Vec<Record>,
        now: DateTime<Utc>,
    ) -> (bool, Vec<AlertLog>) {
        if !self.is_enabled().await {
            return (false, Vec::new());
        }

        let mut logs = Vec::new();
        for record in records.iter_mut() {
            let candidates: Vec<(i64, i64)> = record
                .active_items()
                .map(|item| (item.id, item.strategy_id))
                .collect();
            for (item_id, strategy_id) in candidates {
                let fp = fingerprint(
                    record.biz_id,
                    strategy_id,
                    item_id,
                    &record.target_ip,
                    record.severity,
                );
                if let QosVerdict::Dropped { count } = self.count(&fp).await {
                    tracing::warn!(
                        record_id = %record.id,
                        strategy_id,
                        item_id,
                        count,
                        threshold = self.settings.threshold,
                        "Record dropped by QoS flood control"
                    );
                    record.drop_item(item_id);
                    logs.push(
                        AlertLog::new(
                            Vec::new(),
                            AlertLogOp::QosDrop,
                            format!(
                                "record {} item {item_id} dropped: {count} signals exceed threshold {}",
                                record.id, self.settings.threshold
                            ),
                            now,
                        )
                        .with_count(count as u64),
                    );
                }
            }
        }
        records.retain(Record::has_active_items);
        (true, logs)
    }
}
