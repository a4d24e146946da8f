use alarmflow_access::qos::QosFloodControl;
use alarmflow_common::action::{AlertLog, AlertLogOp};
use alarmflow_common::alert::{Alert, AlertKey};
use alarmflow_common::strategy::Strategy;
use alarmflow_storage::{MultiLock, UpsertMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::checkers::{CheckContext, CheckerRegistry};
use crate::dispatch::ActionDispatcher;
use crate::error::Result;
use crate::pending::PendingAnomalies;
use crate::session::WorkerSession;
use crate::shield::ShieldMatcher;
use crate::snapshot::AlertSnapshotCache;
use crate::{Backends, Checker, CoreSettings};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// TTL of the per-alert lock taken for one cycle.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,
    /// Alerts handled per `manage` call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound of live alerts scheduled by one periodic scan.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            batch_size: default_batch_size(),
            scan_limit: default_scan_limit(),
        }
    }
}

fn default_lock_ttl_secs() -> u64 {
    60
}

fn default_snapshot_ttl_secs() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    500
}

fn default_scan_limit() -> usize {
    10_000
}

pub fn lock_key(dedupe_md5: &str) -> String {
    format!("alert.lock:{dedupe_md5}")
}

/// Counters of one `manage` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub deferred: usize,
    pub failed_checks: usize,
    pub persisted: usize,
    pub persist_failures: usize,
}

/// Drives batches of alerts through the checker chain.
///
/// Every alert is locked by its dedupe key for the duration of the cycle;
/// alerts another worker holds are deferred, never waited on.
pub struct AlertLifecycleManager {
    backends: Backends,
    checkers: Vec<Box<dyn Checker>>,
    dispatcher: Arc<ActionDispatcher>,
    qos: QosFloodControl,
    shields: Arc<dyn ShieldMatcher>,
    snapshots: AlertSnapshotCache,
    pending: PendingAnomalies,
    settings: LifecycleSettings,
}

impl AlertLifecycleManager {
    pub fn new(
        backends: Backends,
        shields: Arc<dyn ShieldMatcher>,
        registry: &CheckerRegistry,
        settings: &CoreSettings,
    ) -> Self {
        Self {
            qos: QosFloodControl::new(backends.kv.clone(), settings.qos.clone()),
            snapshots: AlertSnapshotCache::new(
                backends.kv.clone(),
                settings.lifecycle.snapshot_ttl_secs,
            ),
            pending: PendingAnomalies::new(backends.kv.clone(), settings.lifecycle.snapshot_ttl_secs),
            checkers: registry.build(),
            dispatcher: Arc::new(ActionDispatcher::new(backends.clone(), settings.noise.clone())),
            shields,
            settings: settings.lifecycle.clone(),
            backends,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Arc<ActionDispatcher> {
        &self.dispatcher
    }

    pub fn checker_names(&self) -> Vec<&'static str> {
        self.checkers.iter().map(|c| c.name()).collect()
    }

    /// Runs one lifecycle cycle over `keys`.
    ///
    /// # Errors
    ///
    /// Fails when alerts, locks or strategies cannot be read. Checker and
    /// persistence failures are counted in the report instead.
    pub async fn manage(
        &self,
        keys: &[AlertKey],
        session: &mut WorkerSession,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let mut seen = HashSet::new();
        let ids: Vec<String> = keys
            .iter()
            .filter(|k| seen.insert(k.alert_id.as_str()))
            .map(|k| k.alert_id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(report);
        }

        let alerts = self.load_alerts(&ids).await?;
        let mut lock = MultiLock::new(self.backends.kv.clone(), self.settings.lock_ttl_secs);
        let lock_keys: Vec<String> = alerts.iter().map(|a| lock_key(&a.dedupe_md5)).collect();
        let acquired = lock.acquire(&lock_keys).await?;

        let mut logs = Vec::new();
        let mut locked = Vec::with_capacity(alerts.len());
        for (alert, ok) in alerts.into_iter().zip(acquired) {
            if ok {
                locked.push(alert);
                continue;
            }
            tracing::info!(alert_id = %alert.id, "Alert locked by another worker, deferred");
            report.deferred += 1;
            logs.push(AlertLog::new(
                vec![alert.id.clone()],
                AlertLogOp::LockDeferred,
                format!("alert {} is being processed elsewhere, deferred", alert.id),
                now,
            ));
        }

        let outcome = self.run_locked(&mut locked, &mut logs, &mut report, now).await;

        if !logs.is_empty() {
            if let Err(e) = self.backends.docs.bulk_create_logs(&logs).await {
                tracing::error!(count = logs.len(), error = %e, "Failed to write alert logs");
            }
        }
        if let Err(e) = lock.release().await {
            tracing::warn!(error = %e, "Failed to release alert locks, they expire on their TTL");
        }
        outcome?;

        report.processed = locked.len();
        session.record(&report);
        tracing::info!(
            session_id = %session.session_id,
            processed = report.processed,
            deferred = report.deferred,
            failed_checks = report.failed_checks,
            persisted = report.persisted,
            persist_failures = report.persist_failures,
            "Lifecycle cycle finished"
        );
        Ok(report)
    }

    /// Snapshot copies win for in-cycle state; operator-edited fields come
    /// from the document store.
    async fn load_alerts(&self, ids: &[String]) -> Result<Vec<Alert>> {
        let mut snapshots = self.snapshots.load(ids).await;
        let stored = self.backends.docs.batch_get_alerts(ids).await?;

        let mut alerts = Vec::with_capacity(ids.len());
        for stored in stored {
            match snapshots.remove(&stored.id) {
                Some(mut alert) => {
                    alert.overlay_db_fields(&stored);
                    alerts.push(alert);
                }
                None => alerts.push(stored),
            }
        }
        for id in ids {
            if let Some(alert) = snapshots.remove(id) {
                tracing::debug!(alert_id = %id, "Alert only found in snapshot cache");
                alerts.push(alert);
            }
        }
        Ok(alerts)
    }

    async fn run_locked(
        &self,
        alerts: &mut [Alert],
        logs: &mut Vec<AlertLog>,
        report: &mut CycleReport,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        let strategy_ids: Vec<i64> = alerts
            .iter()
            .filter_map(|a| a.strategy_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let strategies = self.backends.strategies.get_strategies(&strategy_ids).await?;

        self.merge_pending(alerts).await;
        self.run_chain(alerts, &strategies, logs, report, now).await;
        // anomalies ingested while the chain ran
        self.merge_pending(alerts).await;

        let (abnormal, others): (Vec<Alert>, Vec<Alert>) =
            alerts.iter().cloned().partition(|a| a.status.is_abnormal());
        self.persist(&abnormal, UpsertMode::Force, report).await;
        self.persist(&others, UpsertMode::UpdateOnly, report).await;
        self.snapshots.store(&abnormal).await;
        let finished: Vec<String> = others.iter().map(|a| a.id.clone()).collect();
        self.snapshots.evict(&finished).await;
        Ok(())
    }

    async fn merge_pending(&self, alerts: &mut [Alert]) {
        for alert in alerts.iter_mut().filter(|a| a.status.is_abnormal()) {
            self.pending.merge_into(alert).await;
        }
    }

    async fn run_chain(
        &self,
        alerts: &mut [Alert],
        strategies: &HashMap<i64, Strategy>,
        logs: &mut Vec<AlertLog>,
        report: &mut CycleReport,
        now: DateTime<Utc>,
    ) {
        let mut ctx = CheckContext::new(
            now,
            strategies,
            self.backends.docs.as_ref(),
            &self.dispatcher,
            &self.qos,
            self.shields.as_ref(),
        );
        for alert in alerts.iter_mut() {
            for checker in &self.checkers {
                if !checker.is_enabled(alert) {
                    continue;
                }
                if let Err(e) = checker.check(alert, &mut ctx).await {
                    report.failed_checks += 1;
                    tracing::error!(
                        alert_id = %alert.id,
                        checker = checker.name(),
                        error = %e,
                        "Checker failed"
                    );
                }
            }
            alert.update_time = now;
        }
        logs.extend(ctx.take_logs());
    }

    async fn persist(&self, alerts: &[Alert], mode: UpsertMode, report: &mut CycleReport) {
        if alerts.is_empty() {
            return;
        }
        match self.backends.docs.bulk_upsert_alerts(alerts, mode).await {
            Ok(bulk) => {
                report.persisted += bulk.succeeded;
                report.persist_failures += bulk.failed.len();
                for (alert_id, reason) in &bulk.failed {
                    tracing::error!(alert_id = %alert_id, reason = %reason, ?mode, "Alert not persisted");
                }
            }
            Err(e) => {
                report.persist_failures += alerts.len();
                tracing::error!(count = alerts.len(), ?mode, error = %e, "Bulk alert upsert failed");
            }
        }
    }
}
