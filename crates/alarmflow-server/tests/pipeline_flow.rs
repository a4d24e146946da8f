mod common;

use alarmflow_alert::shield::ShieldRule;
use alarmflow_common::strategy::ActionSignal;
use alarmflow_server::config::WorkerConfig;
use alarmflow_server::replay::{self, ReplayFile, Replayer};
use alarmflow_storage::DocumentStore;
use common::*;
use std::collections::BTreeMap;

#[test]
fn config_defaults_apply_to_empty_file() {
    let config = WorkerConfig::parse("").unwrap();
    assert_eq!(config.workers, 2);
    assert_eq!(config.tick_secs, 1);
    assert_eq!(config.scan_interval_secs, 60);
    assert_eq!(config.machine_id, 1);
    assert!(config.strategies_file.is_none());
    assert!(config.shields.is_empty());
    assert_eq!(config.core.lifecycle.lock_ttl_secs, 60);
    assert_eq!(config.core.lifecycle.batch_size, 500);
}

#[test]
fn config_sections_override_core_settings() {
    let config = WorkerConfig::parse(FULL_CONFIG).unwrap();
    assert_eq!(config.workers, 4);
    assert_eq!(config.tick_secs, 5);
    assert_eq!(config.machine_id, 9);
    assert_eq!(config.strategies_file.as_deref(), Some("config/strategies.json"));
    assert_eq!(config.core.lifecycle.lock_ttl_secs, 30);
    assert_eq!(config.core.lifecycle.batch_size, 100);
    assert_eq!(config.core.lifecycle.snapshot_ttl_secs, 3600);
    assert_eq!(config.core.qos.threshold, 50);
    assert_eq!(config.core.qos.window_secs, 120);

    assert_eq!(config.shields.len(), 1);
    let shield = &config.shields[0];
    assert_eq!(shield.id, "maintenance");
    assert_eq!(shield.biz_id, Some(2));
    assert_eq!(shield.dimensions.get("host").map(String::as_str), Some("db-*"));
}

#[test]
fn config_rejects_invalid_values() {
    let err = WorkerConfig::parse("workers = 0").unwrap_err();
    assert!(err.to_string().contains("workers"));
    let err = WorkerConfig::parse("machine_id = 40").unwrap_err();
    assert!(err.to_string().contains("machine_id"));
    assert!(WorkerConfig::parse("workers = \"many\"").is_err());
}

#[test]
fn config_loads_from_file() {
    let file = write_temp(FULL_CONFIG).unwrap();
    let path = file.path().to_string_lossy().to_string();
    let config = WorkerConfig::load(&path).unwrap();
    assert_eq!(config.scan_interval_secs, 30);

    let err = WorkerConfig::load("/nonexistent/worker.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config"));
}

#[test]
fn replay_file_defaults_horizon() {
    let json = serde_json::json!({
        "strategies": [strategy(Vec::new())],
        "records": [record("r1", "web-01", 0)],
    });
    let file: ReplayFile = serde_json::from_value(json).unwrap();
    assert_eq!(file.horizon_secs, 900);
    assert!(file.shields.is_empty());
    assert_eq!(file.records.len(), 1);
}

#[tokio::test]
async fn replay_notifies_then_recovers() {
    let config = WorkerConfig::default();
    let actions = vec![
        notice(11, &[ActionSignal::Abnormal]),
        notice(12, &[ActionSignal::Recovered]),
    ];
    let file = replay_file(vec![strategy(actions)], vec![record("r1", "web-01", 0)]);

    let summary = replay::replay(&config, file).await.unwrap();
    assert_eq!(summary.records, 1);
    assert_eq!(summary.alerts, 1);
    assert_eq!(summary.alerts_by_status.get("RECOVERED"), Some(&1));
    assert_eq!(summary.logs_by_op.get("create"), Some(&1));
    assert_eq!(summary.logs_by_op.get("recover"), Some(&1));
    assert!(summary.actions_by_status.get("running").copied().unwrap_or(0) >= 2);
    assert!(summary.cycles >= 3);
    assert!(summary.tasks_handled > 0);
}

#[tokio::test]
async fn replay_refreshes_one_alert_per_incident() {
    let config = WorkerConfig::default();
    let records = vec![
        record("r1", "web-01", 0),
        record("r2", "web-01", 30),
        record("r3", "web-02", 30),
        record("r4", "web-01", 90),
    ];
    let mut file = replay_file(vec![strategy(vec![notice(11, &[ActionSignal::Abnormal])])], records);
    file.horizon_secs = 60;

    let summary = replay::replay(&config, file).await.unwrap();
    assert_eq!(summary.records, 4);
    assert_eq!(summary.alerts, 2);
    assert_eq!(summary.logs_by_op.get("create"), Some(&2));
    assert_eq!(summary.alerts_by_status.get("ABNORMAL"), Some(&2));
}

#[tokio::test]
async fn replay_keeps_shielded_alerts_silent() {
    let config = WorkerConfig::default();
    let mut dimensions = BTreeMap::new();
    dimensions.insert("host".to_string(), "web-*".to_string());
    let mut file = replay_file(
        vec![strategy(vec![notice(11, &[ActionSignal::Abnormal])])],
        vec![record("r1", "web-01", 0)],
    );
    file.shields.push(ShieldRule {
        id: "maintenance".to_string(),
        biz_id: None,
        strategy_ids: Vec::new(),
        dimensions,
        begin_time: at(-60),
        end_time: None,
    });
    file.horizon_secs = 120;

    let summary = replay::replay(&config, file).await.unwrap();
    assert_eq!(summary.alerts, 1);
    assert_eq!(summary.logs_by_op.get("create"), Some(&1));
    assert!(summary.actions_by_status.is_empty());
    assert!(!summary.logs_by_op.contains_key("unshield"));
}

#[tokio::test]
async fn replay_skips_records_without_strategy() {
    let config = WorkerConfig::default();
    let file = replay_file(Vec::new(), vec![record("r1", "web-01", 0)]);

    let summary = replay::replay(&config, file).await.unwrap();
    assert_eq!(summary.records, 1);
    assert_eq!(summary.alerts, 0);
    assert!(summary.logs_by_op.is_empty());
}

#[tokio::test]
async fn replayer_stores_stay_inspectable() {
    let config = WorkerConfig::default();
    let mut replayer = Replayer::new(
        &config,
        vec![strategy(vec![notice(11, &[ActionSignal::Abnormal])])],
        Vec::new(),
    );
    replayer
        .ingest(vec![record("r1", "web-01", 0)], at(0))
        .await
        .unwrap();
    replayer.advance(at(0), at(10)).await.unwrap();

    let keys = replayer.stores().docs.list_active_alert_keys(10).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(replayer.stores().queue.is_empty().await);
}

#[tokio::test]
async fn empty_replay_yields_empty_summary() {
    let summary = replay::replay(&WorkerConfig::default(), replay_file(Vec::new(), Vec::new()))
        .await
        .unwrap();
    assert_eq!(summary.records, 0);
    assert_eq!(summary.alerts, 0);
    assert_eq!(summary.cycles, 0);
}
