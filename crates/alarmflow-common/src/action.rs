use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::id;
use crate::strategy::{ActionPluginType, ActionSignal, ConvergeConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Created, waiting for convergence.
    Received,
    /// Held by a noise-reduction window.
    Sleep,
    /// Merged into an existing notification batch.
    Converged,
    /// Handed to the execution adapters.
    Running,
    Success,
    /// Dropped without notifying (noise reduction, shield, ...).
    Skipped,
    Failure,
}

/// One action row: a parent per (alert, action config, signal) and, for
/// notices, one child per notice way once the parent is released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInstance {
    pub id: String,
    /// 降噪窗口关联标识
    pub generate_uuid: String,
    pub alert_id: String,
    pub strategy_id: Option<i64>,
    pub action_config_id: i64,
    pub plugin_type: ActionPluginType,
    pub signal: ActionSignal,
    pub status: ActionStatus,
    pub execute_times: u32,
    pub is_parent: bool,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub notice_way: Option<String>,
    #[serde(default)]
    pub notice_ways: Vec<String>,
    #[serde(default)]
    pub receivers: Vec<String>,
    /// 收敛比对维度上下文
    #[serde(default)]
    pub converge_context: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub converge: Option<ConvergeConfig>,
    #[serde(default)]
    pub converge_id: Option<String>,
    pub latest_anomaly_time: DateTime<Utc>,
    pub create_time: DateTime<Utc>,
}

impl ActionInstance {
    /// Children of a notice parent: one per configured notice way.
    /// Other plugin types execute as the parent itself.
    pub fn materialize_children(&self, now: DateTime<Utc>) -> Vec<ActionInstance> {
        if self.plugin_type != ActionPluginType::Notice || !self.is_parent {
            return Vec::new();
        }
        self.notice_ways
            .iter()
            .map(|way| ActionInstance {
                id: id::next_id(),
                generate_uuid: self.generate_uuid.clone(),
                alert_id: self.alert_id.clone(),
                strategy_id: self.strategy_id,
                action_config_id: self.action_config_id,
                plugin_type: self.plugin_type,
                signal: self.signal,
                status: ActionStatus::Received,
                execute_times: self.execute_times,
                is_parent: false,
                parent_id: Some(self.id.clone()),
                notice_way: Some(way.clone()),
                notice_ways: Vec::new(),
                receivers: self.receivers.clone(),
                converge_context: BTreeMap::new(),
                converge: None,
                converge_id: None,
                latest_anomaly_time: self.latest_anomaly_time,
                create_time: now,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLogOp {
    Create,
    Recover,
    Close,
    PriorityInhibit,
    QosDrop,
    NoiseReduceHold,
    NoiseReduceSuppress,
    Converge,
    AckExpired,
    Upgrade,
    Unshield,
    LockDeferred,
    Action,
}

/// Audit entry explaining a lifecycle decision, in particular every
/// suppressed or delayed notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLog {
    pub id: String,
    pub alert_ids: Vec<String>,
    pub op_type: AlertLogOp,
    pub description: String,
    #[serde(default)]
    pub count: u64,
    pub time: DateTime<Utc>,
}

impl AlertLog {
    pub fn new(
        alert_ids: Vec<String>,
        op_type: AlertLogOp,
        description: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id::next_id(),
            alert_ids,
            op_type,
            description: description.into(),
            count: 1,
            time,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }
}
