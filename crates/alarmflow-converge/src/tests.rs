use crate::index::{action_context, dimension_key, ConvergeInstance, ConvergenceIndex, InstanceType};
use crate::noise::{
    need_noise_reduce, noise_dimension_hash, NoiseDecision, NoiseReducer, NoiseSettings,
    NOISE_REDUCE_STAGE,
};
use crate::processor::{resolve_condition, ConvergeOutcome, ConvergeProcessor, ConvergeSettings};
use alarmflow_common::action::{ActionInstance, ActionStatus, AlertLogOp};
use alarmflow_common::alert::{Alert, AlertStatus, ExtraInfo};
use alarmflow_common::strategy::{
    ActionConfig, ActionPluginType, ActionSignal, ConvergeCondition, ConvergeConfig,
    IntervalNotifyMode, NoiseReduceConfig,
};
use alarmflow_common::task::{NoiseWindowTask, Task};
use alarmflow_common::types::Severity;
use alarmflow_storage::{
    DocumentStore, KvStore, MemoryDocumentStore, MemoryKvStore, MemoryTaskQueue, UpsertMode,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn ctx(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    pairs
        .iter()
        .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
        .collect()
}

fn instance(id: &str, at: DateTime<Utc>, context: BTreeMap<String, Vec<String>>) -> ConvergeInstance {
    ConvergeInstance {
        instance_type: InstanceType::Action,
        id: id.to_string(),
        strategy_id: Some(7),
        create_time: at,
        context,
    }
}

fn cond(dimension: &str, values: &[&str]) -> ConvergeCondition {
    ConvergeCondition {
        dimension: dimension.to_string(),
        value: values.iter().map(|v| v.to_string()).collect(),
    }
}

fn make_alert(id: &str, host: &str) -> Alert {
    let mut dimensions = BTreeMap::new();
    dimensions.insert("host".to_string(), host.to_string());
    dimensions.insert("region".to_string(), "sh".to_string());
    Alert {
        id: id.to_string(),
        dedupe_md5: format!("dedupe-{id}"),
        alert_name: "cpu usage high".to_string(),
        strategy_id: Some(7),
        item_id: Some(70),
        biz_id: 2,
        target_ip: host.to_string(),
        status: AlertStatus::Abnormal,
        severity: Severity::Warning,
        dimensions,
        begin_time: t0(),
        first_anomaly_time: t0(),
        latest_time: t0(),
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
        update_time: t0(),
    }
}

fn notice_config(converge: Option<ConvergeConfig>) -> ActionConfig {
    ActionConfig {
        id: 11,
        name: "page ops".to_string(),
        plugin_type: ActionPluginType::Notice,
        signals: vec![ActionSignal::Abnormal],
        notify_interval_secs: 0,
        interval_notify_mode: IntervalNotifyMode::Standard,
        notice_ways: vec!["mail".to_string(), "sms".to_string()],
        receivers: vec!["ops".to_string()],
        upgrade: None,
        converge,
    }
}

fn parent_action(id: &str, alert: &Alert, config: &ActionConfig, at: DateTime<Utc>) -> ActionInstance {
    ActionInstance {
        id: id.to_string(),
        generate_uuid: format!("uuid-{id}"),
        alert_id: alert.id.clone(),
        strategy_id: alert.strategy_id,
        action_config_id: config.id,
        plugin_type: config.plugin_type,
        signal: ActionSignal::Abnormal,
        status: ActionStatus::Received,
        execute_times: 1,
        is_parent: true,
        parent_id: None,
        notice_way: None,
        notice_ways: config.notice_ways.clone(),
        receivers: config.receivers.clone(),
        converge_context: action_context(alert, config, ActionSignal::Abnormal),
        converge: config.converge.clone(),
        converge_id: None,
        latest_anomaly_time: alert.latest_time,
        create_time: at,
    }
}

// ── ConvergenceIndex ──

#[tokio::test]
async fn strict_intersection_across_dimensions() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let index = ConvergenceIndex::new(kv, 3600);

    let full = instance("1", t0(), ctx(&[("alert_name", &["cpu"]), ("target", &["10.0.0.1"])]));
    let partial = instance("2", t0(), ctx(&[("alert_name", &["cpu"])]));
    index.record_instance(&full, t0()).await.unwrap();
    index.record_instance(&partial, t0()).await.unwrap();

    let condition = [cond("alert_name", &["cpu"]), cond("target", &["10.0.0.1"])];
    let matched = index
        .match_condition(Some(7), &condition, t0() - Duration::seconds(60), t0())
        .await
        .unwrap();
    assert!(matched.contains("action_1"));
    assert!(!matched.contains("action_2"));
    assert_eq!(matched.len(), 1);
}

#[tokio::test]
async fn match_is_idempotent_without_writes() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let index = ConvergenceIndex::new(kv, 3600);
    for i in 0..5 {
        let target = format!("10.0.0.{}", i % 2);
        let inst = instance(
            &i.to_string(),
            t0() + Duration::seconds(i),
            ctx(&[("alert_name", &["cpu"]), ("target", &[target.as_str()])]),
        );
        index.record_instance(&inst, t0()).await.unwrap();
    }

    let condition = [cond("alert_name", &["cpu"]), cond("target", &["10.0.0.0", "10.0.0.1"])];
    let window = (t0() - Duration::seconds(10), t0() + Duration::seconds(10));
    let first = index.match_condition(Some(7), &condition, window.0, window.1).await.unwrap();
    let second = index.match_condition(Some(7), &condition, window.0, window.1).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
}

#[tokio::test]
async fn empty_condition_matches_nothing() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let index = ConvergenceIndex::new(kv, 3600);
    index
        .record_instance(&instance("1", t0(), ctx(&[("alert_name", &["cpu"])])), t0())
        .await
        .unwrap();

    let matched = index
        .match_condition(Some(7), &[], t0() - Duration::seconds(60), t0())
        .await
        .unwrap();
    assert!(matched.is_empty());
}

#[tokio::test]
async fn empty_value_list_means_any_value() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let index = ConvergenceIndex::new(kv.clone(), 3600);
    index
        .record_instance(&instance("1", t0(), ctx(&[("target", &["10.0.0.1"])])), t0())
        .await
        .unwrap();
    index
        .record_instance(&instance("2", t0(), ctx(&[("target", &["10.0.0.2"])])), t0())
        .await
        .unwrap();
    index
        .record_instance(&instance("3", t0(), ctx(&[("alert_name", &["cpu"])])), t0())
        .await
        .unwrap();

    let matched = index
        .match_condition(Some(7), &[cond("target", &[])], t0() - Duration::seconds(60), t0())
        .await
        .unwrap();
    assert_eq!(matched.len(), 2);
    assert!(!matched.contains("action_3"), "dimension absent from context is never written");
    assert!(kv.exists(&dimension_key(Some(7), "target", "")).await.unwrap());
}

#[tokio::test]
async fn window_bounds_and_strategy_scope_are_respected() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let index = ConvergenceIndex::new(kv, 3600);
    let c = ctx(&[("alert_name", &["cpu"])]);
    index.record_instance(&instance("old", t0() - Duration::seconds(120), c.clone()), t0()).await.unwrap();
    index.record_instance(&instance("new", t0(), c.clone()), t0()).await.unwrap();
    let mut other = instance("other", t0(), c);
    other.strategy_id = Some(8);
    index.record_instance(&other, t0()).await.unwrap();

    let matched = index
        .match_condition(Some(7), &[cond("alert_name", &["cpu"])], t0() - Duration::seconds(60), t0())
        .await
        .unwrap();
    assert_eq!(matched.into_iter().collect::<Vec<_>>(), vec!["action_new".to_string()]);
}

#[tokio::test]
async fn writes_sweep_entries_past_retention() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let index = ConvergenceIndex::new(kv, 60);
    let c = ctx(&[("alert_name", &["cpu"])]);
    index.record_instance(&instance("1", t0(), c.clone()), t0()).await.unwrap();

    let later = t0() + Duration::seconds(120);
    index.record_instance(&instance("2", later, c), later).await.unwrap();

    let matched = index
        .match_condition(Some(7), &[cond("alert_name", &["cpu"])], t0() - Duration::seconds(1), later)
        .await
        .unwrap();
    assert!(!matched.contains("action_1"));
    assert!(matched.contains("action_2"));
}

#[tokio::test]
async fn sub_convergence_bucket_is_shared_across_strategies() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let index = ConvergenceIndex::new(kv, 3600);
    let labels = ctx(&[
        ("bk_biz_id", &["2"]),
        ("notice_receiver", &["ops"]),
        ("notice_way", &["mail"]),
        ("alert_level", &["2"]),
        ("signal", &["abnormal"]),
    ]);

    let mut a = instance("c1", t0(), labels.clone());
    a.instance_type = InstanceType::Converge;
    let mut b = instance("c2", t0(), labels.clone());
    b.instance_type = InstanceType::Converge;
    b.strategy_id = Some(99);
    index.record_sub_instance(&a, t0()).await.unwrap();
    index.record_sub_instance(&b, t0()).await.unwrap();

    let matched = index
        .match_sub_condition(&labels, t0() - Duration::seconds(60), t0())
        .await
        .unwrap();
    assert_eq!(matched.len(), 2);
    assert!(matched.contains("converge_c1"));

    let mut other_way = labels;
    other_way.insert("notice_way".to_string(), vec!["sms".to_string()]);
    let none = index
        .match_sub_condition(&other_way, t0() - Duration::seconds(60), t0())
        .await
        .unwrap();
    assert!(none.is_empty());
}

// ── ConvergeProcessor ──

struct Fixture {
    kv: Arc<MemoryKvStore>,
    docs: Arc<MemoryDocumentStore>,
    queue: Arc<MemoryTaskQueue>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            kv: Arc::new(MemoryKvStore::new()),
            docs: Arc::new(MemoryDocumentStore::new()),
            queue: Arc::new(MemoryTaskQueue::new()),
        }
    }

    fn processor(&self) -> ConvergeProcessor {
        ConvergeProcessor::new(
            self.kv.clone(),
            self.docs.clone(),
            self.queue.clone(),
            ConvergeSettings::default(),
        )
    }

    fn reducer(&self) -> NoiseReducer {
        NoiseReducer::new(
            self.kv.clone(),
            self.docs.clone(),
            self.queue.clone(),
            NoiseSettings::default(),
        )
    }

    async fn queued(&self) -> Vec<Task> {
        self.queue.pending().await.into_iter().map(|t| t.task).collect()
    }
}

fn converge_by_name(count: usize) -> ConvergeConfig {
    ConvergeConfig {
        is_enabled: true,
        timedelta_secs: 600,
        count,
        condition: vec![cond("alert_name", &["self"]), cond("strategy_id", &[])],
        need_sub_converge: true,
    }
}

#[tokio::test]
async fn similar_actions_converge_once_count_is_reached() {
    let fx = Fixture::new();
    let processor = fx.processor();
    let config = notice_config(Some(converge_by_name(2)));

    let mut outcomes = Vec::new();
    for i in 0..3 {
        let at = t0() + Duration::seconds(i);
        let alert = make_alert(&format!("a{i}"), &format!("10.0.0.{i}"));
        let action = parent_action(&format!("act{i}"), &alert, &config, at);
        fx.docs.insert_actions(&[action]).await.unwrap();
        outcomes.push(processor.process(&format!("act{i}"), 0, at).await);
    }

    assert_eq!(outcomes[0], ConvergeOutcome::Released);
    let (id1, id2) = match (&outcomes[1], &outcomes[2]) {
        (
            ConvergeOutcome::Converged { converge_id: a, created: true, matched: 1 },
            ConvergeOutcome::Converged { converge_id: b, created: false, matched: 2 },
        ) => (a.clone(), b.clone()),
        other => panic!("unexpected outcomes: {other:?}"),
    };
    assert_eq!(id1, id2);

    // the opener of the batch carries its notice
    let queued = fx.queued().await;
    assert_eq!(
        queued,
        vec![
            Task::ExecuteActions {
                action_ids: vec!["act0".to_string()],
                need_notice: true,
            },
            Task::ExecuteActions {
                action_ids: vec!["act1".to_string()],
                need_notice: true,
            },
        ]
    );

    let converged = fx
        .docs
        .get_actions(&["act1".to_string(), "act2".to_string()])
        .await
        .unwrap();
    let status_of = |id: &str| converged.iter().find(|a| a.id == id).map(|a| (a.status, a.converge_id.clone()));
    assert_eq!(status_of("act1"), Some((ActionStatus::Converged, Some(id1.clone()))));
    assert_eq!(status_of("act2"), Some((ActionStatus::Skipped, Some(id1))));
    let logs = fx.docs.logs().await;
    assert_eq!(logs.iter().filter(|l| l.op_type == AlertLogOp::Converge).count(), 2);
}

#[tokio::test]
async fn sub_convergence_merges_into_the_older_batch() {
    let fx = Fixture::new();
    let processor = fx.processor();
    let config = notice_config(Some(converge_by_name(2)));

    // two strategies with the same receivers, ways and level
    let mut outcomes = Vec::new();
    for (i, strategy_id) in [7, 7, 8, 8].into_iter().enumerate() {
        let at = t0() + Duration::seconds(i as i64);
        let mut alert = make_alert(&format!("a{i}"), &format!("10.0.0.{i}"));
        alert.strategy_id = Some(strategy_id);
        let action = parent_action(&format!("act{i}"), &alert, &config, at);
        fx.docs.insert_actions(&[action]).await.unwrap();
        outcomes.push(processor.process(&format!("act{i}"), 0, at).await);
    }

    assert_eq!(outcomes[0], ConvergeOutcome::Released);
    assert_eq!(outcomes[2], ConvergeOutcome::Released);
    let first = match &outcomes[1] {
        ConvergeOutcome::Converged { converge_id, created: true, .. } => converge_id.clone(),
        other => panic!("unexpected outcome: {other:?}"),
    };
    match &outcomes[3] {
        ConvergeOutcome::SubConverged { converge_id, batch_id } => {
            assert_ne!(converge_id, &first);
            assert_eq!(batch_id, &first);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let merged = fx.docs.get_actions(&["act3".to_string()]).await.unwrap();
    assert_eq!(merged[0].status, ActionStatus::Skipped);
    assert_eq!(merged[0].converge_id.as_deref(), Some(first.as_str()));

    let notified: Vec<Vec<String>> = fx
        .queued()
        .await
        .into_iter()
        .filter_map(|t| match t {
            Task::ExecuteActions { action_ids, need_notice: true } => Some(action_ids),
            _ => None,
        })
        .collect();
    assert_eq!(
        notified,
        vec![vec!["act0".to_string()], vec!["act1".to_string()], vec!["act2".to_string()]]
    );
}

#[tokio::test]
async fn sub_convergence_off_keeps_batches_apart() {
    let fx = Fixture::new();
    let processor = fx.processor();
    let mut converge = converge_by_name(2);
    converge.need_sub_converge = false;
    let config = notice_config(Some(converge));

    let mut outcomes = Vec::new();
    for (i, strategy_id) in [7, 7, 8, 8].into_iter().enumerate() {
        let at = t0() + Duration::seconds(i as i64);
        let mut alert = make_alert(&format!("a{i}"), &format!("10.0.0.{i}"));
        alert.strategy_id = Some(strategy_id);
        let action = parent_action(&format!("act{i}"), &alert, &config, at);
        fx.docs.insert_actions(&[action]).await.unwrap();
        outcomes.push(processor.process(&format!("act{i}"), 0, at).await);
    }

    assert!(matches!(outcomes[3], ConvergeOutcome::Converged { created: true, .. }));
    assert_eq!(fx.queued().await.len(), 4);
}

#[tokio::test]
async fn actions_without_convergence_are_released() {
    let fx = Fixture::new();
    let config = notice_config(None);
    let alert = make_alert("a1", "10.0.0.1");
    fx.docs
        .insert_actions(&[parent_action("act1", &alert, &config, t0())])
        .await
        .unwrap();

    assert_eq!(fx.processor().process("act1", 0, t0()).await, ConvergeOutcome::Released);
    assert_eq!(fx.queued().await.len(), 1);
}

#[tokio::test]
async fn store_errors_retry_at_most_three_times() {
    let fx = Fixture::new();
    let processor = fx.processor();
    let config = notice_config(Some(converge_by_name(2)));
    let alert = make_alert("a1", "10.0.0.1");
    fx.docs
        .insert_actions(&[parent_action("act1", &alert, &config, t0())])
        .await
        .unwrap();
    fx.kv.set_unavailable(true);

    for attempt in 0..3 {
        assert_eq!(
            processor.process("act1", attempt, t0()).await,
            ConvergeOutcome::Retrying { attempt: attempt + 1 }
        );
    }
    assert_eq!(processor.process("act1", 3, t0()).await, ConvergeOutcome::Abandoned);

    let pending = fx.queue.pending().await;
    assert_eq!(pending.len(), 3);
    assert!(pending
        .iter()
        .all(|t| t.eta == t0() + Duration::seconds(5) && matches!(t.task, Task::Converge { .. })));
}

#[tokio::test]
async fn missing_action_is_not_retried() {
    let fx = Fixture::new();
    assert_eq!(fx.processor().process("ghost", 0, t0()).await, ConvergeOutcome::Abandoned);
    assert!(fx.queued().await.is_empty());
}

#[test]
fn self_values_resolve_from_the_action_context() {
    let context = ctx(&[("target", &["10.0.0.1"])]);
    let resolved = resolve_condition(&[cond("target", &["self"]), cond("signal", &["abnormal"])], &context)
        .unwrap();
    assert_eq!(resolved[0].value, vec!["10.0.0.1".to_string()]);
    assert_eq!(resolved[1].value, vec!["abnormal".to_string()]);

    assert!(resolve_condition(&[cond("alert_name", &["self"])], &context).is_none());
}

// ── NoiseReducer ──

fn noise_config() -> NoiseReduceConfig {
    NoiseReduceConfig {
        is_enabled: true,
        dimensions: vec!["host".to_string()],
        count: 40,
        window_secs: 300,
    }
}

/// Tracks `total` distinct hosts, then holds one alert for each of the
/// first `abnormal` hosts. Returns the evaluation task of the window.
async fn fill_window(fx: &Fixture, total: usize, abnormal: usize) -> NoiseWindowTask {
    let reducer = fx.reducer();
    let config = noise_config();
    let action_config = notice_config(None);
    for i in 0..total {
        let alert = make_alert(&format!("seen{i}"), &format!("h{i}"));
        reducer
            .track_signal(7, &config, &alert.dimensions, t0())
            .await
            .unwrap();
    }
    for i in 0..abnormal {
        let alert = make_alert(&format!("a{i}"), &format!("h{i}"));
        let parent = parent_action(&format!("act{i}"), &alert, &action_config, t0());
        fx.docs.bulk_upsert_alerts(&[alert.clone()], UpsertMode::Force).await.unwrap();
        fx.docs.insert_actions(&[parent.clone()]).await.unwrap();
        let opened = reducer.hold(&alert, &parent, &config, t0()).await.unwrap();
        assert_eq!(opened, i == 0, "only the first signal opens the window");
    }

    let tasks: Vec<NoiseWindowTask> = fx
        .queue
        .take_due(t0() + Duration::seconds(300))
        .await
        .into_iter()
        .filter_map(|t| match t {
            Task::EvaluateNoiseWindow(w) => Some(w),
            _ => None,
        })
        .collect();
    assert_eq!(tasks.len(), 1);
    tasks.into_iter().next().unwrap()
}

#[tokio::test]
async fn hold_schedules_one_expiring_evaluation_and_sleeps_the_action() {
    let fx = Fixture::new();
    let reducer = fx.reducer();
    let config = noise_config();
    let action_config = notice_config(None);
    let alert = make_alert("a0", "h0");
    let parent = parent_action("act0", &alert, &action_config, t0());
    fx.docs.insert_actions(&[parent.clone()]).await.unwrap();

    assert!(reducer.hold(&alert, &parent, &config, t0()).await.unwrap());

    let pending = fx.queue.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].eta, t0() + Duration::seconds(300));
    assert_eq!(pending[0].expires, Some(t0() + Duration::seconds(420)));

    let stored = fx.docs.get_actions(&["act0".to_string()]).await.unwrap();
    assert_eq!(stored[0].status, ActionStatus::Sleep);
    assert!(fx
        .docs
        .logs()
        .await
        .iter()
        .any(|l| l.op_type == AlertLogOp::NoiseReduceHold && l.alert_ids == vec!["a0".to_string()]));
}

#[tokio::test]
async fn failed_hold_leaves_the_window_untouched() {
    let fx = Fixture::new();
    let reducer = fx.reducer();
    let config = noise_config();
    let action_config = notice_config(None);
    let alert = make_alert("a0", "h0");
    let parent = parent_action("act0", &alert, &action_config, t0());
    fx.docs.insert_actions(&[parent.clone()]).await.unwrap();

    fx.docs.set_unavailable(true);
    assert!(reducer.hold(&alert, &parent, &config, t0()).await.is_err());
    fx.docs.set_unavailable(false);

    // the caller routes the action to convergence, so the window must not own it
    let tracking = format!("noise_reduce.alert:7:{}", noise_dimension_hash(&config));
    let tracked = fx
        .kv
        .zrange_by_score(&tracking, f64::NEG_INFINITY, f64::INFINITY)
        .await
        .unwrap();
    assert!(tracked.is_empty());
    assert!(fx.queued().await.is_empty());
}

#[tokio::test]
async fn low_abnormal_share_suppresses_the_window() {
    let fx = Fixture::new();
    let task = fill_window(&fx, 10, 3).await;

    let decision = fx.reducer().evaluate(&task, task.window_end).await.unwrap();
    assert_eq!(decision, NoiseDecision::Suppressed { percent: 30.0, alerts: 3 });

    let alerts = fx
        .docs
        .batch_get_alerts(&["a0".to_string(), "a1".to_string(), "a2".to_string()])
        .await
        .unwrap();
    assert!(alerts
        .iter()
        .all(|a| a.handle_stage.contains(&NOISE_REDUCE_STAGE.to_string())));
    let suppress = fx
        .docs
        .logs()
        .await
        .into_iter()
        .find(|l| l.op_type == AlertLogOp::NoiseReduceSuppress)
        .unwrap();
    assert_eq!(suppress.count, 3);

    match &fx.queued().await[..] {
        [Task::ExecuteActions { action_ids, need_notice: false }] => assert_eq!(action_ids.len(), 3),
        other => panic!("unexpected queue: {other:?}"),
    }
}

#[tokio::test]
async fn high_abnormal_share_notifies_with_children() {
    let fx = Fixture::new();
    let task = fill_window(&fx, 10, 5).await;

    let decision = fx.reducer().evaluate(&task, task.window_end).await.unwrap();
    // 5 parents and one child per notice way each
    assert_eq!(decision, NoiseDecision::Notified { percent: 50.0, actions: 15 });

    let children = fx
        .docs
        .all_actions()
        .await
        .into_iter()
        .filter(|a| !a.is_parent)
        .count();
    assert_eq!(children, 10);
    match &fx.queued().await[..] {
        [Task::ExecuteActions { action_ids, need_notice: true }] => assert_eq!(action_ids.len(), 15),
        other => panic!("unexpected queue: {other:?}"),
    }
}

#[tokio::test]
async fn window_is_evaluated_exactly_once() {
    let fx = Fixture::new();
    let task = fill_window(&fx, 10, 5).await;
    let reducer = fx.reducer();

    assert!(matches!(
        reducer.evaluate(&task, task.window_end).await.unwrap(),
        NoiseDecision::Notified { .. }
    ));
    // redelivery of the same task
    assert_eq!(
        reducer.evaluate(&task, task.window_end).await.unwrap(),
        NoiseDecision::Skipped
    );

    // a late arrival opens a fresh window instead of reviving the old one
    let late = make_alert("late", "h1");
    let parent = parent_action("act-late", &late, &notice_config(None), task.window_end);
    fx.docs.insert_actions(&[parent.clone()]).await.unwrap();
    assert!(reducer
        .hold(&late, &parent, &noise_config(), task.window_end + Duration::seconds(1))
        .await
        .unwrap());
}

#[tokio::test]
async fn empty_baseline_counts_as_zero_percent() {
    let fx = Fixture::new();
    let task = NoiseWindowTask {
        strategy_id: 7,
        noise_dimension_hash: "nothing-here".to_string(),
        window_begin: t0(),
        window_end: t0() + Duration::seconds(300),
        threshold: 10,
    };
    let decision = fx.reducer().evaluate(&task, task.window_end).await.unwrap();
    assert_eq!(decision, NoiseDecision::Suppressed { percent: 0.0, alerts: 0 });
}

#[test]
fn noise_reduction_applies_to_abnormal_signals_only() {
    let config = noise_config();
    let mut alert = make_alert("a1", "h1");
    assert!(need_noise_reduce(&alert, ActionSignal::Abnormal, Some(&config)));
    assert!(!need_noise_reduce(&alert, ActionSignal::NoData, Some(&config)));
    assert!(!need_noise_reduce(&alert, ActionSignal::Abnormal, None));

    let disabled = NoiseReduceConfig {
        is_enabled: false,
        ..noise_config()
    };
    assert!(!need_noise_reduce(&alert, ActionSignal::Abnormal, Some(&disabled)));

    alert.status = AlertStatus::Recovering;
    assert!(!need_noise_reduce(&alert, ActionSignal::Abnormal, Some(&config)));
}
