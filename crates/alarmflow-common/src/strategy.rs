use serde::{Deserialize, Serialize};

use crate::types::Item;

/// Event that triggers an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSignal {
    Abnormal,
    NoData,
    Recovered,
    Closed,
    Ack,
    Unshielded,
    Upgrade,
}

impl std::fmt::Display for ActionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionSignal::Abnormal => "abnormal",
            ActionSignal::NoData => "no_data",
            ActionSignal::Recovered => "recovered",
            ActionSignal::Closed => "closed",
            ActionSignal::Ack => "ack",
            ActionSignal::Unshielded => "unshielded",
            ActionSignal::Upgrade => "upgrade",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPluginType {
    Notice,
    Webhook,
    Job,
}

/// How the repeat-notification interval evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalNotifyMode {
    /// Constant interval.
    #[default]
    Standard,
    /// Interval doubles after every notification.
    Increasing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    /// 告警持续多久未处理后升级（秒）
    pub interval_secs: u64,
    pub user_groups: Vec<Vec<String>>,
}

/// One `{dimension: [values]}` pair of a convergence condition.
///
/// The value `"self"` stands for the action's own values of that dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergeCondition {
    pub dimension: String,
    #[serde(default)]
    pub value: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergeConfig {
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    /// 收敛时间窗口（秒）
    pub timedelta_secs: u64,
    /// 窗口内命中多少个实例（含自身）后收敛
    pub count: usize,
    pub condition: Vec<ConvergeCondition>,
    #[serde(default)]
    pub need_sub_converge: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseReduceConfig {
    #[serde(default)]
    pub is_enabled: bool,
    /// 降噪维度
    pub dimensions: Vec<String>,
    /// 异常比例阈值（百分比）
    pub count: u32,
    #[serde(default = "default_noise_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub id: i64,
    pub name: String,
    pub plugin_type: ActionPluginType,
    pub signals: Vec<ActionSignal>,
    /// 通知间隔（秒），0 表示不重复通知
    #[serde(default)]
    pub notify_interval_secs: u64,
    #[serde(default)]
    pub interval_notify_mode: IntervalNotifyMode,
    #[serde(default)]
    pub notice_ways: Vec<String>,
    #[serde(default)]
    pub receivers: Vec<String>,
    #[serde(default)]
    pub upgrade: Option<UpgradeConfig>,
    #[serde(default)]
    pub converge: Option<ConvergeConfig>,
}

impl ActionConfig {
    pub fn handles(&self, signal: ActionSignal) -> bool {
        self.signals.contains(&signal)
    }
}

/// Strategy snapshot as returned by the relational config store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub biz_id: i64,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    pub items: Vec<Item>,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
    #[serde(default)]
    pub noise_reduce: Option<NoiseReduceConfig>,
    /// 多久无新异常后进入恢复中（秒）
    #[serde(default = "default_recovery_window_secs")]
    pub recovery_window_secs: u64,
    /// 恢复中状态的观察期（秒）
    #[serde(default = "default_recovery_grace_secs")]
    pub recovery_grace_secs: u64,
}

impl Strategy {
    pub fn action(&self, id: i64) -> Option<&ActionConfig> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// The noise-reduction config, only when enabled.
    pub fn noise_reduce(&self) -> Option<&NoiseReduceConfig> {
        self.noise_reduce.as_ref().filter(|c| c.is_enabled)
    }
}

fn default_true() -> bool {
    true
}

fn default_noise_window_secs() -> u64 {
    300
}

fn default_recovery_window_secs() -> u64 {
    300
}

fn default_recovery_grace_secs() -> u64 {
    120
}
