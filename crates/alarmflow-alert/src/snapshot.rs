use alarmflow_common::alert::Alert;
use alarmflow_storage::KvStore;
use std::collections::HashMap;
use std::sync::Arc;

pub fn snapshot_key(alert_id: &str) -> String {
    format!("alert.snapshot:{alert_id}")
}

/// Latest in-cycle state of each alert, kept in the key-value store between
/// cycles. The document store stays authoritative for operator-edited
/// fields, which the manager overlays after loading.
pub struct AlertSnapshotCache {
    kv: Arc<dyn KvStore>,
    ttl_secs: u64,
}

impl AlertSnapshotCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self { kv, ttl_secs }
    }

    /// Snapshots found for `ids`. Unreadable entries are skipped so the
    /// caller falls back to the document store.
    pub async fn load(&self, ids: &[String]) -> HashMap<String, Alert> {
        let mut found = HashMap::new();
        for id in ids {
            match self.kv.get(&snapshot_key(id)).await {
                Ok(Some(raw)) => match serde_json::from_str::<Alert>(&raw) {
                    Ok(alert) => {
                        found.insert(id.clone(), alert);
                    }
                    Err(e) => tracing::warn!(alert_id = %id, error = %e, "Corrupt alert snapshot ignored"),
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Alert snapshot cache unavailable, using document store");
                    return HashMap::new();
                }
            }
        }
        found
    }

    pub async fn store(&self, alerts: &[Alert]) {
        for alert in alerts {
            let raw = match serde_json::to_string(alert) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(alert_id = %alert.id, error = %e, "Failed to encode alert snapshot");
                    continue;
                }
            };
            if let Err(e) = self
                .kv
                .set(&snapshot_key(&alert.id), &raw, Some(self.ttl_secs))
                .await
            {
                tracing::warn!(alert_id = %alert.id, error = %e, "Failed to refresh alert snapshot");
                return;
            }
        }
    }

    /// Drops the snapshots of alerts that left the live states.
    pub async fn evict(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let keys: Vec<String> = ids.iter().map(|id| snapshot_key(id)).collect();
        if let Err(e) = self.kv.delete(&keys).await {
            tracing::warn!(count = keys.len(), error = %e, "Failed to evict alert snapshots");
        }
    }
}
