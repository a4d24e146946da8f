use alarmflow_common::action::{ActionInstance, ActionStatus, AlertLog};
use alarmflow_common::alert::{Alert, AlertKey};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Overwrite whatever is stored.
    Force,
    /// Only update documents that already exist.
    UpdateOnly,
}

/// Outcome of a bulk write. Partial failures are reported, not raised.
#[derive(Debug, Clone, Default)]
pub struct BulkReport {
    pub succeeded: usize,
    pub failed: Vec<(String, String)>,
}

impl BulkReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Persisted alerts, actions and audit logs.
///
/// Writes are assumed at-least-once durable; the lifecycle core re-reads
/// state every cycle instead of caching it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_alert(&self, id: &str) -> Result<Option<Alert>>;

    async fn batch_get_alerts(&self, ids: &[String]) -> Result<Vec<Alert>>;

    /// The live (abnormal or recovering) alert for a dedupe key, if any.
    async fn find_live_alert(&self, dedupe_md5: &str) -> Result<Option<Alert>>;

    async fn bulk_upsert_alerts(&self, alerts: &[Alert], mode: UpsertMode) -> Result<BulkReport>;

    async fn list_active_alert_keys(&self, limit: usize) -> Result<Vec<AlertKey>>;

    async fn append_handle_stage(&self, alert_ids: &[String], stage: &str) -> Result<u64>;

    async fn bulk_create_logs(&self, logs: &[AlertLog]) -> Result<()>;

    async fn insert_actions(&self, actions: &[ActionInstance]) -> Result<()>;

    async fn get_actions(&self, ids: &[String]) -> Result<Vec<ActionInstance>>;

    async fn actions_by_uuid(&self, uuids: &[String]) -> Result<Vec<ActionInstance>>;

    async fn child_actions(&self, parent_ids: &[String]) -> Result<Vec<ActionInstance>>;

    /// Most recent parent action of `action_config_id` for an alert.
    async fn latest_action(
        &self,
        alert_id: &str,
        action_config_id: i64,
    ) -> Result<Option<ActionInstance>>;

    async fn update_action_status(&self, ids: &[String], status: ActionStatus) -> Result<u64>;

    async fn set_action_converge(&self, id: &str, converge_id: &str) -> Result<()>;
}

#[derive(Default)]
struct Documents {
    alerts: HashMap<String, Alert>,
    actions: HashMap<String, ActionInstance>,
    logs: Vec<AlertLog>,
}

/// In-process [`DocumentStore`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<Documents>,
    rejected: RwLock<HashSet<String>>,
    unavailable: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes every later upsert of this alert fail, to exercise partial
    /// bulk failures.
    pub async fn reject_alert(&self, id: &str) {
        self.rejected.write().await.insert(id.to_string());
    }

    pub async fn logs(&self) -> Vec<AlertLog> {
        self.docs.read().await.logs.clone()
    }

    pub async fn all_actions(&self) -> Vec<ActionInstance> {
        let mut actions: Vec<ActionInstance> =
            self.docs.read().await.actions.values().cloned().collect();
        actions.sort_by(|a, b| a.create_time.cmp(&b.create_time).then_with(|| a.id.cmp(&b.id)));
        actions
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory document store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        self.check()?;
        Ok(self.docs.read().await.alerts.get(id).cloned())
    }

    async fn batch_get_alerts(&self, ids: &[String]) -> Result<Vec<Alert>> {
        self.check()?;
        let docs = self.docs.read().await;
        Ok(ids.iter().filter_map(|id| docs.alerts.get(id).cloned()).collect())
    }

    async fn find_live_alert(&self, dedupe_md5: &str) -> Result<Option<Alert>> {
        self.check()?;
        let docs = self.docs.read().await;
        Ok(docs
            .alerts
            .values()
            .filter(|a| a.dedupe_md5 == dedupe_md5 && a.status.is_abnormal())
            .max_by_key(|a| a.begin_time)
            .cloned())
    }

    async fn bulk_upsert_alerts(&self, alerts: &[Alert], mode: UpsertMode) -> Result<BulkReport> {
        self.check()?;
        let rejected = self.rejected.read().await;
        let mut docs = self.docs.write().await;
        let mut report = BulkReport::default();
        for alert in alerts {
            if rejected.contains(&alert.id) {
                report
                    .failed
                    .push((alert.id.clone(), "document rejected by store".into()));
                continue;
            }
            if mode == UpsertMode::UpdateOnly && !docs.alerts.contains_key(&alert.id) {
                report
                    .failed
                    .push((alert.id.clone(), "document missing".into()));
                continue;
            }
            docs.alerts.insert(alert.id.clone(), alert.clone());
            report.succeeded += 1;
        }
        Ok(report)
    }

    async fn list_active_alert_keys(&self, limit: usize) -> Result<Vec<AlertKey>> {
        self.check()?;
        let docs = self.docs.read().await;
        let mut live: Vec<&Alert> = docs.alerts.values().filter(|a| a.status.is_abnormal()).collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(live.into_iter().take(limit).map(Alert::key).collect())
    }

    async fn append_handle_stage(&self, alert_ids: &[String], stage: &str) -> Result<u64> {
        self.check()?;
        let mut docs = self.docs.write().await;
        let mut updated = 0;
        for id in alert_ids {
            if let Some(alert) = docs.alerts.get_mut(id) {
                if !alert.handle_stage.iter().any(|s| s == stage) {
                    alert.handle_stage.push(stage.to_string());
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn bulk_create_logs(&self, logs: &[AlertLog]) -> Result<()> {
        self.check()?;
        self.docs.write().await.logs.extend_from_slice(logs);
        Ok(())
    }

    async fn insert_actions(&self, actions: &[ActionInstance]) -> Result<()> {
        self.check()?;
        let mut docs = self.docs.write().await;
        for action in actions {
            docs.actions.insert(action.id.clone(), action.clone());
        }
        Ok(())
    }

    async fn get_actions(&self, ids: &[String]) -> Result<Vec<ActionInstance>> {
        self.check()?;
        let docs = self.docs.read().await;
        Ok(ids.iter().filter_map(|id| docs.actions.get(id).cloned()).collect())
    }

    async fn actions_by_uuid(&self, uuids: &[String]) -> Result<Vec<ActionInstance>> {
        self.check()?;
        let wanted: HashSet<&String> = uuids.iter().collect();
        let docs = self.docs.read().await;
        Ok(docs
            .actions
            .values()
            .filter(|a| a.is_parent && wanted.contains(&a.generate_uuid))
            .cloned()
            .collect())
    }

    async fn child_actions(&self, parent_ids: &[String]) -> Result<Vec<ActionInstance>> {
        self.check()?;
        let wanted: HashSet<&String> = parent_ids.iter().collect();
        let docs = self.docs.read().await;
        Ok(docs
            .actions
            .values()
            .filter(|a| a.parent_id.as_ref().is_some_and(|p| wanted.contains(p)))
            .cloned()
            .collect())
    }

    async fn latest_action(
        &self,
        alert_id: &str,
        action_config_id: i64,
    ) -> Result<Option<ActionInstance>> {
        self.check()?;
        let docs = self.docs.read().await;
        Ok(docs
            .actions
            .values()
            .filter(|a| {
                a.is_parent && a.alert_id == alert_id && a.action_config_id == action_config_id
            })
            .max_by_key(|a| a.create_time)
            .cloned())
    }

    async fn update_action_status(&self, ids: &[String], status: ActionStatus) -> Result<u64> {
        self.check()?;
        let mut docs = self.docs.write().await;
        let mut updated = 0;
        for id in ids {
            if let Some(action) = docs.actions.get_mut(id) {
                action.status = status;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn set_action_converge(&self, id: &str, converge_id: &str) -> Result<()> {
        self.check()?;
        let mut docs = self.docs.write().await;
        let action = docs.actions.get_mut(id).ok_or_else(|| StoreError::NotFound {
            entity: "action",
            id: id.to_string(),
        })?;
        action.converge_id = Some(converge_id.to_string());
        action.status = ActionStatus::Converged;
        Ok(())
    }
}
