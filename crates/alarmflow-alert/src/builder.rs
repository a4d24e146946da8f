use alarmflow_common::action::{AlertLog, AlertLogOp};
use alarmflow_common::alert::{Alert, AlertKey, AlertStatus, CycleHandleRecord, ExtraInfo};
use alarmflow_common::hash;
use alarmflow_common::id;
use alarmflow_common::strategy::{ActionSignal, Strategy};
use alarmflow_common::types::{Item, Record};
use alarmflow_storage::{MultiLock, UpsertMode};
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::{ActionDispatcher, ActionRequest};
use crate::error::{LifecycleError, Result};
use crate::manager::{lock_key, LifecycleSettings};
use crate::pending::{PendingAnomalies, PendingAnomaly};
use crate::shield::ShieldMatcher;
use crate::snapshot::AlertSnapshotCache;
use crate::Backends;

/// Identity shared by every signal of one incident: strategy, item and the
/// full dimension set.
pub fn dedupe_md5(strategy_id: i64, item_id: i64, record: &Record) -> String {
    let mut parts = vec![strategy_id.to_string(), item_id.to_string()];
    parts.extend(record.dimensions.iter().map(|(k, v)| format!("{k}={v}")));
    hash::digest(&parts)
}

/// Dedupe keys with the `(record, item)` pairs that hit them, in first-seen order.
type Incidents<'r> = Vec<(String, Vec<(&'r Record, &'r Item)>)>;

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Every alert created or refreshed, in first-seen order.
    pub alerts: Vec<AlertKey>,
    pub created: usize,
    pub refreshed: usize,
    /// Pairs skipped because their strategy is missing or disabled.
    pub skipped: usize,
    /// Records parked because their alert was locked elsewhere.
    pub parked: usize,
    pub persist_failures: usize,
    pub logs: Vec<AlertLog>,
}

/// Turns surviving abnormal `(record, item)` pairs into alerts.
///
/// Every dedupe key is locked like a lifecycle cycle locks it. Records of a
/// key held elsewhere are parked as [`PendingAnomaly`]s for the holder.
pub struct AlertBuilder {
    backends: Backends,
    dispatcher: Arc<ActionDispatcher>,
    shields: Arc<dyn ShieldMatcher>,
    snapshots: AlertSnapshotCache,
    pending: PendingAnomalies,
    lock_ttl_secs: u64,
}

impl AlertBuilder {
    pub fn new(
        backends: Backends,
        dispatcher: Arc<ActionDispatcher>,
        shields: Arc<dyn ShieldMatcher>,
        settings: &LifecycleSettings,
    ) -> Self {
        Self {
            snapshots: AlertSnapshotCache::new(backends.kv.clone(), settings.snapshot_ttl_secs),
            pending: PendingAnomalies::new(backends.kv.clone(), settings.snapshot_ttl_secs),
            lock_ttl_secs: settings.lock_ttl_secs,
            backends,
            dispatcher,
            shields,
        }
    }

    /// Creates or refreshes one alert per dedupe key found in `records`.
    /// New alerts get their first notification right away.
    ///
    /// # Errors
    ///
    /// Fails when the alert locks or the live-alert lookup cannot be read.
    /// Notification and persistence failures are logged and counted.
    pub async fn build(
        &self,
        records: &[Record],
        strategies: &HashMap<i64, Strategy>,
        now: DateTime<Utc>,
    ) -> Result<BuildReport> {
        let mut report = BuildReport::default();
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<(&Record, &Item)>> = HashMap::new();

        for record in records.iter().filter(|r| r.is_abnormal) {
            for item in record.active_items() {
                let strategy = match strategies.get(&item.strategy_id) {
                    Some(s) if s.is_enabled => s,
                    _ => {
                        let err = LifecycleError::ConfigMissing {
                            entity: "strategy",
                            id: item.strategy_id.to_string(),
                        };
                        tracing::debug!(record_id = %record.id, item_id = item.id, error = %err, "Record skipped");
                        report.skipped += 1;
                        continue;
                    }
                };
                match grouped.entry(dedupe_md5(strategy.id, item.id, record)) {
                    Entry::Occupied(mut e) => e.get_mut().push((record, item)),
                    Entry::Vacant(e) => {
                        order.push(e.key().clone());
                        e.insert(vec![(record, item)]);
                    }
                }
            }
        }
        if order.is_empty() {
            return Ok(report);
        }

        let mut lock = MultiLock::new(self.backends.kv.clone(), self.lock_ttl_secs);
        let lock_keys: Vec<String> = order.iter().map(|d| lock_key(d)).collect();
        let acquired = lock.acquire(&lock_keys).await?;

        let mut owned: Incidents<'_> = Vec::with_capacity(order.len());
        let mut contended: Incidents<'_> = Vec::new();
        for (dedupe, ok) in order.into_iter().zip(acquired) {
            let Some(pairs) = grouped.remove(&dedupe) else {
                continue;
            };
            if ok {
                owned.push((dedupe, pairs));
            } else {
                contended.push((dedupe, pairs));
            }
        }

        let outcome = async {
            self.park(contended, &mut report).await?;
            self.build_locked(owned, strategies, &mut report, now).await
        }
        .await;
        if let Err(e) = lock.release().await {
            tracing::warn!(error = %e, "Failed to release alert locks, they expire on their TTL");
        }
        outcome?;
        Ok(report)
    }

    /// Parks the records of alerts locked elsewhere. Live ones are still
    /// reported so a cycle picks their anomalies up.
    async fn park(&self, contended: Incidents<'_>, report: &mut BuildReport) -> Result<()> {
        for (dedupe, pairs) in contended {
            for (record, _) in &pairs {
                if let Err(e) = self
                    .pending
                    .push(&dedupe, &PendingAnomaly::from_record(record))
                    .await
                {
                    tracing::error!(record_id = %record.id, dedupe_md5 = %dedupe, error = %e, "Failed to park anomaly");
                    continue;
                }
                report.parked += 1;
            }
            if let Some(live) = self.backends.docs.find_live_alert(&dedupe).await? {
                report.alerts.push(live.key());
            }
            tracing::info!(dedupe_md5 = %dedupe, records = pairs.len(), "Alert locked by another worker, anomaly parked");
        }
        Ok(())
    }

    async fn build_locked(
        &self,
        owned: Incidents<'_>,
        strategies: &HashMap<i64, Strategy>,
        report: &mut BuildReport,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut alerts = Vec::with_capacity(owned.len());
        for (dedupe, pairs) in owned {
            let Some(&(first, item)) = pairs.first() else {
                continue;
            };
            let (mut alert, created) = match self.find_live(&dedupe).await? {
                Some(alert) => (alert, false),
                None => (self.new_alert(&dedupe, first, item, now), true),
            };
            for (record, _) in &pairs {
                refresh(&mut alert, record);
            }
            self.pending.merge_into(&mut alert).await;
            alert.update_time = now;

            if created {
                report.created += 1;
                report.logs.push(AlertLog::new(
                    vec![alert.id.clone()],
                    AlertLogOp::Create,
                    format!("alert {} created: {}", alert.id, alert.alert_name),
                    now,
                ));
                if let Some(strategy) = alert.strategy_id.and_then(|sid| strategies.get(&sid)) {
                    self.first_notice(&mut alert, strategy, now).await;
                }
                tracing::info!(
                    alert_id = %alert.id,
                    strategy_id = ?alert.strategy_id,
                    dedupe_md5 = %alert.dedupe_md5,
                    is_shielded = alert.is_shielded,
                    "Alert created"
                );
            } else {
                report.refreshed += 1;
                tracing::debug!(alert_id = %alert.id, "Alert refreshed");
            }
            report.alerts.push(alert.key());
            alerts.push(alert);
        }

        if !alerts.is_empty() {
            match self
                .backends
                .docs
                .bulk_upsert_alerts(&alerts, UpsertMode::Force)
                .await
            {
                Ok(bulk) => {
                    report.persist_failures += bulk.failed.len();
                    for (alert_id, reason) in &bulk.failed {
                        tracing::error!(alert_id = %alert_id, reason = %reason, "Alert not persisted");
                    }
                }
                Err(e) => {
                    report.persist_failures += alerts.len();
                    tracing::error!(count = alerts.len(), error = %e, "Bulk alert upsert failed");
                }
            }
            self.snapshots.store(&alerts).await;
        }
        Ok(())
    }

    /// The live alert for `dedupe`, preferring its cached in-cycle copy.
    async fn find_live(&self, dedupe: &str) -> Result<Option<Alert>> {
        let Some(stored) = self.backends.docs.find_live_alert(dedupe).await? else {
            return Ok(None);
        };
        let mut cached = self.snapshots.load(std::slice::from_ref(&stored.id)).await;
        Ok(Some(match cached.remove(&stored.id) {
            Some(mut alert) if alert.status.is_abnormal() => {
                alert.overlay_db_fields(&stored);
                alert
            }
            _ => stored,
        }))
    }

    fn new_alert(&self, dedupe: &str, record: &Record, item: &Item, now: DateTime<Utc>) -> Alert {
        let mut alert = Alert {
            id: id::next_id(),
            dedupe_md5: dedupe.to_string(),
            alert_name: item.name.clone(),
            strategy_id: Some(item.strategy_id),
            item_id: Some(item.id),
            biz_id: record.biz_id,
            target_ip: record.target_ip.clone(),
            status: AlertStatus::Abnormal,
            severity: record.severity,
            dimensions: record.dimensions.clone(),
            begin_time: record.timestamp,
            first_anomaly_time: record.timestamp,
            latest_time: record.timestamp,
            end_time: None,
            recovering_since: None,
            next_status: None,
            next_status_time: None,
            is_no_data: false,
            is_shielded: false,
            shield_ids: Vec::new(),
            is_ack: false,
            ack_operator: None,
            ack_until: None,
            assignee: Vec::new(),
            handle_stage: Vec::new(),
            extra_info: ExtraInfo::default(),
            update_time: now,
        };
        alert.shield_ids = self.shields.match_alert(&alert, now);
        alert.is_shielded = !alert.shield_ids.is_empty();
        alert
    }

    /// First notification of every abnormal config. Shielded alerts are
    /// notified by the shield checker once the shield ends.
    async fn first_notice(&self, alert: &mut Alert, strategy: &Strategy, now: DateTime<Utc>) {
        if alert.is_shielded {
            return;
        }
        for config in strategy.actions.iter().filter(|c| c.handles(ActionSignal::Abnormal)) {
            let dispatched = self
                .dispatcher
                .dispatch(
                    ActionRequest {
                        alert,
                        config,
                        signal: ActionSignal::Abnormal,
                        execute_times: 1,
                        receivers: None,
                        noise: strategy.noise_reduce(),
                    },
                    now,
                )
                .await;
            match dispatched {
                Ok(_) => alert.set_cycle_record(
                    config.id,
                    CycleHandleRecord {
                        last_time: now,
                        is_shielded: false,
                        latest_anomaly_time: alert.latest_time,
                        execute_times: 1,
                    },
                ),
                Err(e) => tracing::error!(
                    alert_id = %alert.id,
                    action_config_id = config.id,
                    error = %e,
                    "First notification failed"
                ),
            }
        }
    }
}

fn refresh(alert: &mut Alert, record: &Record) {
    if record.timestamp > alert.latest_time {
        alert.latest_time = record.timestamp;
    }
    alert.severity = alert.severity.max(record.severity);
    alert.is_no_data = false;
}
