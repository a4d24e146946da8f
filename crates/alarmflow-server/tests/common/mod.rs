#![allow(dead_code)]

use alarmflow_common::strategy::{ActionConfig, ActionPluginType, ActionSignal, IntervalNotifyMode, Strategy};
use alarmflow_common::types::{Item, Record, Severity};
use alarmflow_server::replay::ReplayFile;
use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::io::Write;
use tempfile::NamedTempFile;

pub const STRATEGY_ID: i64 = 7;
pub const ITEM_ID: i64 = 70;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

pub fn item() -> Item {
    Item {
        id: ITEM_ID,
        strategy_id: STRATEGY_ID,
        name: "disk usage high".to_string(),
        priority: None,
        priority_group_key: None,
        interval_secs: 60,
    }
}

pub fn notice(id: i64, signals: &[ActionSignal]) -> ActionConfig {
    ActionConfig {
        id,
        name: format!("notice-{id}"),
        plugin_type: ActionPluginType::Notice,
        signals: signals.to_vec(),
        notify_interval_secs: 0,
        interval_notify_mode: IntervalNotifyMode::Standard,
        notice_ways: vec!["mail".to_string()],
        receivers: vec!["ops".to_string()],
        upgrade: None,
        converge: None,
    }
}

pub fn strategy(actions: Vec<ActionConfig>) -> Strategy {
    Strategy {
        id: STRATEGY_ID,
        biz_id: 2,
        name: "host disk".to_string(),
        is_enabled: true,
        items: vec![item()],
        actions,
        noise_reduce: None,
        recovery_window_secs: 300,
        recovery_grace_secs: 120,
    }
}

pub fn record(id: &str, host: &str, secs: i64) -> Record {
    let mut dimensions = BTreeMap::new();
    dimensions.insert("host".to_string(), host.to_string());
    Record::new(id, 2, "10.0.0.1", at(secs), Severity::Warning, dimensions, vec![item()])
}

pub fn replay_file(strategies: Vec<Strategy>, records: Vec<Record>) -> ReplayFile {
    ReplayFile {
        strategies,
        records,
        shields: Vec::new(),
        horizon_secs: 900,
    }
}

/// Writes `content` to a temp file that lives as long as the handle.
pub fn write_temp(content: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file)
}

pub const FULL_CONFIG: &str = r#"
workers = 4
tick_secs = 5
scan_interval_secs = 30
machine_id = 9
strategies_file = "config/strategies.json"

[lifecycle]
lock_ttl_secs = 30
batch_size = 100

[qos]
threshold = 50
window_secs = 120

[[shields]]
id = "maintenance"
biz_id = 2
begin_time = "2024-03-01T00:00:00Z"
end_time = "2024-03-02T00:00:00Z"

[shields.dimensions]
host = "db-*"
"#;
