use alarmflow_access::priority::PriorityInhibitor;
use alarmflow_access::qos::QosFloodControl;
use alarmflow_common::alert::AlertKey;
use alarmflow_common::task::Task;
use alarmflow_common::types::Record;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::builder::AlertBuilder;
use crate::dispatch::ActionDispatcher;
use crate::error::Result;
use crate::shield::ShieldMatcher;
use crate::{Backends, CoreSettings};

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub received: usize,
    pub inhibited: usize,
    pub qos_dropped: usize,
    pub created: usize,
    pub refreshed: usize,
    /// Records parked for an alert locked by a running cycle.
    pub parked: usize,
    pub alerts: Vec<AlertKey>,
}

/// Record path: priority inhibition, QoS, noise baselines, then alert
/// building. Touched alerts are queued for a lifecycle cycle.
pub struct AlarmPipeline {
    backends: Backends,
    priority: PriorityInhibitor,
    qos: QosFloodControl,
    dispatcher: Arc<ActionDispatcher>,
    builder: AlertBuilder,
}

impl AlarmPipeline {
    pub fn new(backends: Backends, shields: Arc<dyn ShieldMatcher>, settings: &CoreSettings) -> Self {
        let dispatcher = Arc::new(ActionDispatcher::new(backends.clone(), settings.noise.clone()));
        Self {
            priority: PriorityInhibitor::new(backends.kv.clone()),
            qos: QosFloodControl::new(backends.kv.clone(), settings.qos.clone()),
            builder: AlertBuilder::new(
                backends.clone(),
                dispatcher.clone(),
                shields,
                &settings.lifecycle,
            ),
            dispatcher,
            backends,
        }
    }

    /// # Errors
    ///
    /// Fails when strategies, alert locks, live alerts or the task queue
    /// cannot be reached. Gate and audit-log failures never abort ingestion.
    pub async fn ingest(&mut self, mut records: Vec<Record>, now: DateTime<Utc>) -> Result<IngestReport> {
        let mut report = IngestReport {
            received: records.len(),
            ..IngestReport::default()
        };

        let mut logs = self.priority.check_records(&mut records, now).await;
        self.priority.sync_priority(now).await;
        report.inhibited = logs.len();

        let (_, qos_logs) = self.qos.filter_records(&mut records, now).await;
        report.qos_dropped = qos_logs.len();
        logs.extend(qos_logs);

        let strategy_ids: Vec<i64> = records
            .iter()
            .flat_map(|r| r.active_items().map(|i| i.strategy_id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let strategies = self.backends.strategies.get_strategies(&strategy_ids).await?;

        for record in &records {
            for item in record.active_items() {
                let Some(config) = strategies.get(&item.strategy_id).and_then(|s| s.noise_reduce()) else {
                    continue;
                };
                if let Err(e) = self
                    .dispatcher
                    .noise()
                    .track_signal(item.strategy_id, config, &record.dimensions, now)
                    .await
                {
                    tracing::warn!(record_id = %record.id, error = %e, "Failed to count noise baseline");
                }
            }
        }

        let built = self.builder.build(&records, &strategies, now).await?;
        report.created = built.created;
        report.refreshed = built.refreshed;
        report.parked = built.parked;
        logs.extend(built.logs);

        if !logs.is_empty() {
            if let Err(e) = self.backends.docs.bulk_create_logs(&logs).await {
                tracing::error!(count = logs.len(), error = %e, "Failed to write ingest logs");
            }
        }
        if !built.alerts.is_empty() {
            self.backends
                .queue
                .schedule(
                    Task::ManageAlerts {
                        keys: built.alerts.clone(),
                    },
                    now,
                    None,
                )
                .await?;
        }
        report.alerts = built.alerts;

        tracing::info!(
            received = report.received,
            inhibited = report.inhibited,
            qos_dropped = report.qos_dropped,
            created = report.created,
            refreshed = report.refreshed,
            parked = report.parked,
            "Records ingested"
        );
        Ok(report)
    }
}
