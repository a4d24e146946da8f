use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Abnormal,
    Recovering,
    Recovered,
    Closed,
}

impl AlertStatus {
    /// Abnormal and recovering alerts are still live and go through the
    /// checker chain every cycle.
    pub fn is_abnormal(self) -> bool {
        matches!(self, AlertStatus::Abnormal | AlertStatus::Recovering)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Abnormal => write!(f, "ABNORMAL"),
            AlertStatus::Recovering => write!(f, "RECOVERING"),
            AlertStatus::Recovered => write!(f, "RECOVERED"),
            AlertStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Per-(alert, action config) notification cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleHandleRecord {
    /// 上一次发送通知的时间
    pub last_time: DateTime<Utc>,
    /// 上一次处理时告警是否处于屏蔽状态
    pub is_shielded: bool,
    /// 上一次通知所对应的最新异常时间
    pub latest_anomaly_time: DateTime<Utc>,
    /// 已执行次数
    pub execute_times: u32,
}

/// Escalation progress of one action config's upgrade policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeNoticeState {
    pub last_upgrade_time: DateTime<Utc>,
    /// Index into `UpgradeConfig::user_groups` of the last notified group.
    pub group_index: usize,
}

/// Free-form alert annotations. The typed fields are read by the checker
/// chain; everything else rides along in `other`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraInfo {
    #[serde(default)]
    pub cycle_handle_record: BTreeMap<String, CycleHandleRecord>,
    #[serde(default)]
    pub upgrade_notice: BTreeMap<String, UpgradeNoticeState>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl ExtraInfo {
    /// Merge a newer copy into this one key by key.
    ///
    /// Free-form keys from `newer` win. Cycle records keep whichever side
    /// notified last, so a cycle never rewinds a record another worker
    /// already advanced.
    pub fn merge_from(&mut self, newer: &ExtraInfo) {
        for (k, v) in &newer.other {
            self.other.insert(k.clone(), v.clone());
        }
        for (k, theirs) in &newer.cycle_handle_record {
            match self.cycle_handle_record.get(k) {
                Some(ours) if ours.last_time >= theirs.last_time => {}
                _ => {
                    self.cycle_handle_record.insert(k.clone(), *theirs);
                }
            }
        }
        for (k, theirs) in &newer.upgrade_notice {
            match self.upgrade_notice.get(k) {
                Some(ours) if ours.last_upgrade_time >= theirs.last_upgrade_time => {}
                _ => {
                    self.upgrade_notice.insert(k.clone(), *theirs);
                }
            }
        }
    }
}

/// Lookup key used when scheduling lifecycle work for an alert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub alert_id: String,
    pub strategy_id: Option<i64>,
}

/// A deduplicated, ongoing incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// 告警去重标识，同一事件的重复信号共享该值
    pub dedupe_md5: String,
    pub alert_name: String,
    pub strategy_id: Option<i64>,
    pub item_id: Option<i64>,
    pub biz_id: i64,
    pub target_ip: String,
    pub status: AlertStatus,
    pub severity: Severity,
    pub dimensions: BTreeMap<String, String>,
    pub begin_time: DateTime<Utc>,
    pub first_anomaly_time: DateTime<Utc>,
    pub latest_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// 进入恢复中状态的时间
    #[serde(default)]
    pub recovering_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_status: Option<AlertStatus>,
    #[serde(default)]
    pub next_status_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_no_data: bool,
    #[serde(default)]
    pub is_shielded: bool,
    #[serde(default)]
    pub shield_ids: Vec<String>,
    #[serde(default)]
    pub is_ack: bool,
    #[serde(default)]
    pub ack_operator: Option<String>,
    #[serde(default)]
    pub ack_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee: Vec<String>,
    #[serde(default)]
    pub handle_stage: Vec<String>,
    #[serde(default)]
    pub extra_info: ExtraInfo,
    pub update_time: DateTime<Utc>,
}

impl Alert {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            alert_id: self.id.clone(),
            strategy_id: self.strategy_id,
        }
    }

    /// Overlay the fields operators edit between cycles. The stored copy is
    /// authoritative for them; `extra_info` is merged rather than replaced.
    pub fn overlay_db_fields(&mut self, stored: &Alert) {
        self.assignee = stored.assignee.clone();
        self.is_ack = stored.is_ack;
        self.ack_operator = stored.ack_operator.clone();
        self.ack_until = stored.ack_until;
        self.handle_stage = stored.handle_stage.clone();
        self.extra_info.merge_from(&stored.extra_info);
    }

    pub fn cycle_record(&self, action_config_id: i64) -> Option<CycleHandleRecord> {
        self.extra_info
            .cycle_handle_record
            .get(&action_config_id.to_string())
            .copied()
    }

    pub fn set_cycle_record(&mut self, action_config_id: i64, record: CycleHandleRecord) {
        self.extra_info
            .cycle_handle_record
            .insert(action_config_id.to_string(), record);
    }

    /// Dimension pairs rendered as `key=value`, in key order.
    pub fn dimension_pairs(&self) -> Vec<String> {
        self.dimensions.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}
