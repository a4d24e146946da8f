use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::hash;

/// Alarm severity, ordered from least to most severe.
///
/// The numeric level (`1` = fatal, `2` = warning, `3` = remind) is what
/// appears in fingerprints and cache keys.
///
/// # Examples
///
/// ```
/// use alarmflow_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert_eq!(sev.level(), 2);
/// assert!(Severity::Fatal > Severity::Remind);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Remind,
    Warning,
    Fatal,
}

impl Severity {
    pub fn level(self) -> u8 {
        match self {
            Severity::Fatal => 1,
            Severity::Warning => 2,
            Severity::Remind => 3,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Remind => write!(f, "remind"),
            Severity::Warning => write!(f, "warning"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remind" | "3" => Ok(Severity::Remind),
            "warning" | "2" => Ok(Severity::Warning),
            "fatal" | "1" => Ok(Severity::Fatal),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// One detection rule inside a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub strategy_id: i64,
    pub name: String,
    /// 优先级，数值越大越重要；`None` 表示不参与优先级抑制
    #[serde(default)]
    pub priority: Option<i64>,
    /// 优先级分组，同组内的监控项按维度互相抑制
    #[serde(default)]
    pub priority_group_key: Option<String>,
    /// 检测周期（秒）
    pub interval_secs: u64,
}

/// Per-item processing state carried by a [`Record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    pub retained: bool,
    pub inhibited: bool,
}

impl Default for ItemState {
    fn default() -> Self {
        Self {
            retained: true,
            inhibited: false,
        }
    }
}

/// One collected data point or event entering the pipeline.
///
/// A record may match several items (multi-strategy fan-out); the retain and
/// inhibit flags are tracked per item and never leak between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub biz_id: i64,
    pub target_ip: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// 是否为异常点；正常点只参与降噪基线统计
    pub is_abnormal: bool,
    pub dimensions: BTreeMap<String, String>,
    pub items: Vec<Item>,
    #[serde(default)]
    pub item_states: HashMap<i64, ItemState>,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        biz_id: i64,
        target_ip: impl Into<String>,
        timestamp: DateTime<Utc>,
        severity: Severity,
        dimensions: BTreeMap<String, String>,
        items: Vec<Item>,
    ) -> Self {
        let item_states = items.iter().map(|i| (i.id, ItemState::default())).collect();
        Self {
            id: id.into(),
            biz_id,
            target_ip: target_ip.into(),
            timestamp,
            severity,
            is_abnormal: true,
            dimensions,
            items,
            item_states,
        }
    }

    /// Identity of this record's dimensions, shared by every item.
    pub fn dimensions_md5(&self) -> String {
        hash::dimensions_digest(&self.dimensions)
    }

    pub fn is_retained(&self, item_id: i64) -> bool {
        self.item_states.get(&item_id).copied().unwrap_or_default().retained
    }

    pub fn is_inhibited(&self, item_id: i64) -> bool {
        self.item_states.get(&item_id).copied().unwrap_or_default().inhibited
    }

    pub fn set_inhibited(&mut self, item_id: i64, inhibited: bool) {
        self.item_states.entry(item_id).or_default().inhibited = inhibited;
    }

    pub fn drop_item(&mut self, item_id: i64) {
        self.item_states.entry(item_id).or_default().retained = false;
    }

    /// Items that are still retained and not inhibited.
    pub fn active_items(&self) -> impl Iterator<Item = &Item> {
        self.items
            .iter()
            .filter(|i| self.is_retained(i.id) && !self.is_inhibited(i.id))
    }

    pub fn has_active_items(&self) -> bool {
        self.active_items().next().is_some()
    }
}
