//! Anomalies that arrived while another worker held the alert's lock.
//!
//! Ingestion never waits on a lock. A record whose alert is locked is parked
//! here and folded into the alert by whoever holds the lock next: the
//! lifecycle manager at the end of its cycle, or the next ingest that wins
//! the lock.

use alarmflow_common::alert::Alert;
use alarmflow_common::types::{Record, Severity};
use alarmflow_storage::kv::score_of;
use alarmflow_storage::KvStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

pub fn pending_key(dedupe_md5: &str) -> String {
    format!("alert.pending:{dedupe_md5}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAnomaly {
    pub record_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
}

impl PendingAnomaly {
    pub fn from_record(record: &Record) -> Self {
        Self {
            record_id: record.id.clone(),
            timestamp: record.timestamp,
            severity: record.severity,
        }
    }

    /// Same refresh an ingested record applies to its live alert.
    pub fn apply(&self, alert: &mut Alert) {
        if self.timestamp > alert.latest_time {
            alert.latest_time = self.timestamp;
        }
        alert.severity = alert.severity.max(self.severity);
        alert.is_no_data = false;
    }
}

pub struct PendingAnomalies {
    kv: Arc<dyn KvStore>,
    ttl_secs: u64,
}

impl PendingAnomalies {
    pub fn new(kv: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self { kv, ttl_secs }
    }

    pub async fn push(&self, dedupe_md5: &str, anomaly: &PendingAnomaly) -> Result<()> {
        let key = pending_key(dedupe_md5);
        let member = match serde_json::to_string(anomaly) {
            Ok(member) => member,
            Err(e) => {
                tracing::warn!(record_id = %anomaly.record_id, error = %e, "Failed to encode pending anomaly");
                return Ok(());
            }
        };
        self.kv
            .zadd(&key, &[(score_of(anomaly.timestamp), member)])
            .await?;
        self.kv.expire(&key, self.ttl_secs).await?;
        Ok(())
    }

    /// Takes the parked anomalies of `dedupe_md5`, oldest first. Call only
    /// while holding the alert's lock.
    pub async fn drain(&self, dedupe_md5: &str) -> Result<Vec<PendingAnomaly>> {
        let key = pending_key(dedupe_md5);
        let raw = self
            .kv
            .zrange_by_score(&key, f64::NEG_INFINITY, f64::INFINITY)
            .await?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let mut anomalies = Vec::with_capacity(raw.len());
        for member in &raw {
            match serde_json::from_str::<PendingAnomaly>(member) {
                Ok(anomaly) => anomalies.push(anomaly),
                Err(e) => tracing::warn!(key = %key, error = %e, "Corrupt pending anomaly dropped"),
            }
        }
        // entries parked after the read score later and stay for the next holder
        let upto = anomalies
            .iter()
            .map(|a| score_of(a.timestamp))
            .fold(f64::NEG_INFINITY, f64::max);
        if upto.is_finite() {
            self.kv
                .zrem_range_by_score(&key, f64::NEG_INFINITY, upto)
                .await?;
        } else {
            self.kv.delete(std::slice::from_ref(&key)).await?;
        }
        Ok(anomalies)
    }

    /// Folds the parked anomalies into `alert`. Returns how many were
    /// applied; read failures leave them parked.
    pub async fn merge_into(&self, alert: &mut Alert) -> usize {
        match self.drain(&alert.dedupe_md5).await {
            Ok(anomalies) => {
                for anomaly in &anomalies {
                    anomaly.apply(alert);
                }
                if !anomalies.is_empty() {
                    tracing::debug!(
                        alert_id = %alert.id,
                        count = anomalies.len(),
                        latest_time = %alert.latest_time,
                        "Pending anomalies merged"
                    );
                }
                anomalies.len()
            }
            Err(e) => {
                tracing::warn!(alert_id = %alert.id, error = %e, "Pending anomalies unavailable");
                0
            }
        }
    }
}
