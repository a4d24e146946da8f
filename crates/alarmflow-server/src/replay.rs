use alarmflow_alert::pipeline::AlarmPipeline;
use alarmflow_alert::shield::{ShieldRule, ShieldRuleSet};
use alarmflow_alert::worker::TaskWorker;
use alarmflow_alert::{Backends, CheckerRegistry};
use alarmflow_common::strategy::Strategy;
use alarmflow_common::types::Record;
use alarmflow_storage::{
    DocumentStore, MemoryDocumentStore, MemoryKvStore, MemoryStrategyStore, MemoryTaskQueue,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::WorkerConfig;

/// The in-memory backend set one process runs against.
#[derive(Clone)]
pub struct MemoryBackends {
    pub kv: Arc<MemoryKvStore>,
    pub docs: Arc<MemoryDocumentStore>,
    pub strategies: Arc<MemoryStrategyStore>,
    pub queue: Arc<MemoryTaskQueue>,
}

impl MemoryBackends {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            kv: Arc::new(MemoryKvStore::new()),
            docs: Arc::new(MemoryDocumentStore::new()),
            strategies: Arc::new(MemoryStrategyStore::new(strategies)),
            queue: Arc::new(MemoryTaskQueue::new()),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            kv: self.kv.clone(),
            docs: self.docs.clone(),
            strategies: self.strategies.clone(),
            queue: self.queue.clone(),
        }
    }
}

/// Input of a replay run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayFile {
    pub strategies: Vec<Strategy>,
    pub records: Vec<Record>,
    #[serde(default)]
    pub shields: Vec<ShieldRule>,
    /// How long the clock keeps running after the last record.
    #[serde(default = "default_horizon_secs")]
    pub horizon_secs: u64,
}

fn default_horizon_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub records: usize,
    pub alerts: usize,
    pub alerts_by_status: BTreeMap<String, usize>,
    pub actions_by_status: BTreeMap<String, usize>,
    pub logs_by_op: BTreeMap<String, usize>,
    pub tasks_handled: usize,
    pub cycles: u64,
}

fn label<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => format!("{value:?}"),
    }
}

/// Drives the whole core on a simulated clock: records are ingested at
/// their own timestamps and the worker ticks every `tick_secs` in between,
/// scanning live alerts every `scan_interval_secs`.
pub struct Replayer {
    stores: MemoryBackends,
    pipeline: AlarmPipeline,
    worker: TaskWorker,
    tick: Duration,
    scan_interval: Duration,
    last_scan: Option<DateTime<Utc>>,
    tasks_handled: usize,
}

impl Replayer {
    pub fn new(config: &WorkerConfig, strategies: Vec<Strategy>, shields: Vec<ShieldRule>) -> Self {
        let stores = MemoryBackends::new(strategies);
        let shields = Arc::new(ShieldRuleSet::new(shields));
        let pipeline = AlarmPipeline::new(stores.backends(), shields.clone(), &config.core);
        let worker = TaskWorker::new(
            stores.backends(),
            shields,
            &CheckerRegistry::standard(),
            &config.core,
        );
        Self {
            stores,
            pipeline,
            worker,
            tick: Duration::seconds(config.tick_secs.max(1) as i64),
            scan_interval: Duration::seconds(config.scan_interval_secs.max(1) as i64),
            last_scan: None,
            tasks_handled: 0,
        }
    }

    pub fn stores(&self) -> &MemoryBackends {
        &self.stores
    }

    pub async fn ingest(&mut self, records: Vec<Record>, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.pipeline.ingest(records, now).await?;
        self.tasks_handled += self.worker.run_due(&self.stores.queue, now).await;
        Ok(())
    }

    /// Ticks the clock from `from` (exclusive) to `to` (inclusive).
    pub async fn advance(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> anyhow::Result<()> {
        let mut now = from + self.tick;
        while now <= to {
            let scan_due = self.last_scan.map_or(true, |last| now - last >= self.scan_interval);
            if scan_due {
                self.worker.scan_active(now).await?;
                self.last_scan = Some(now);
            }
            self.tasks_handled += self.worker.run_due(&self.stores.queue, now).await;
            now += self.tick;
        }
        Ok(())
    }

    pub async fn run(&mut self, mut records: Vec<Record>, horizon_secs: u64) -> anyhow::Result<ReplaySummary> {
        records.sort_by_key(|r| r.timestamp);
        let total = records.len();
        let Some(first) = records.first().map(|r| r.timestamp) else {
            return Ok(ReplaySummary::default());
        };

        let mut clock = first;
        let mut batch: Vec<Record> = Vec::new();
        for record in records {
            if record.timestamp != clock && !batch.is_empty() {
                self.ingest(std::mem::take(&mut batch), clock).await?;
                self.advance(clock, record.timestamp).await?;
                clock = record.timestamp;
            }
            batch.push(record);
        }
        self.ingest(batch, clock).await?;
        self.advance(clock, clock + Duration::seconds(horizon_secs as i64))
            .await?;

        let mut summary = self.summarize().await?;
        summary.records = total;
        Ok(summary)
    }

    async fn summarize(&self) -> anyhow::Result<ReplaySummary> {
        let docs = &self.stores.docs;
        let logs = docs.logs().await;
        let actions = docs.all_actions().await;

        let alert_ids: Vec<String> = logs
            .iter()
            .flat_map(|l| l.alert_ids.iter().cloned())
            .chain(actions.iter().map(|a| a.alert_id.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let alerts = docs.batch_get_alerts(&alert_ids).await?;

        let mut summary = ReplaySummary {
            alerts: alerts.len(),
            tasks_handled: self.tasks_handled,
            cycles: self.worker.session().cycles,
            ..ReplaySummary::default()
        };
        for alert in &alerts {
            *summary.alerts_by_status.entry(alert.status.to_string()).or_default() += 1;
        }
        for action in &actions {
            *summary.actions_by_status.entry(label(&action.status)).or_default() += 1;
        }
        for log in &logs {
            *summary.logs_by_op.entry(label(&log.op_type)).or_default() += 1;
        }
        Ok(summary)
    }
}

/// Replays `file` under `config` and summarizes the resulting state.
pub async fn replay(config: &WorkerConfig, file: ReplayFile) -> anyhow::Result<ReplaySummary> {
    let mut shields = config.shields.clone();
    shields.extend(file.shields);
    let mut replayer = Replayer::new(config, file.strategies, shields);
    replayer.run(file.records, file.horizon_secs).await
}
