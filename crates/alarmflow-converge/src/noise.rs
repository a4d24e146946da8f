//! Deferred-window noise reduction.
//!
//! The first abnormal signal of a quiet window schedules one evaluation at
//! the window's end. Until then every qualifying action sleeps; the
//! evaluation compares the abnormal share of all signals seen in the window
//! against the configured percentage and releases or suppresses them all at
//! once.

use alarmflow_common::action::{ActionInstance, ActionStatus, AlertLog, AlertLogOp};
use alarmflow_common::alert::{Alert, AlertStatus};
use alarmflow_common::hash;
use alarmflow_common::strategy::{ActionSignal, NoiseReduceConfig};
use alarmflow_common::task::{NoiseWindowTask, Task};
use alarmflow_storage::kv::score_of;
use alarmflow_storage::{DocumentStore, KvStore, ServiceLock, TaskQueue};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{ConvergeError, Result};

/// Handle stage appended to alerts whose window was suppressed.
pub const NOISE_REDUCE_STAGE: &str = "noise_reduce";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseSettings {
    /// How long an undelivered evaluation stays valid after the window ends.
    #[serde(default = "default_expire_grace_secs")]
    pub expire_grace_secs: u64,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            expire_grace_secs: default_expire_grace_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

fn default_expire_grace_secs() -> u64 {
    120
}

fn default_lock_ttl_secs() -> u64 {
    30
}

/// Identity of a configured dimension key set.
pub fn noise_dimension_hash(config: &NoiseReduceConfig) -> String {
    let keys: BTreeSet<&str> = config.dimensions.iter().map(String::as_str).collect();
    let keys: Vec<&str> = keys.into_iter().collect();
    hash::digest(&keys)
}

/// Identity of one signal's values for the configured keys.
pub fn dimension_value_hash(config: &NoiseReduceConfig, dimensions: &BTreeMap<String, String>) -> String {
    let mut keys = config.dimensions.clone();
    keys.sort();
    keys.dedup();
    hash::dimension_values_digest(dimensions, &keys)
}

pub fn need_noise_reduce(alert: &Alert, signal: ActionSignal, config: Option<&NoiseReduceConfig>) -> bool {
    signal == ActionSignal::Abnormal
        && alert.status == AlertStatus::Abnormal
        && config.is_some_and(|c| c.is_enabled)
}

struct WindowKeys {
    abnormal: String,
    alerts: String,
    total: String,
    lock: String,
    execute_lock: String,
}

impl WindowKeys {
    fn new(strategy_id: i64, noise_dimension_hash: &str) -> Self {
        let scope = format!("{strategy_id}:{noise_dimension_hash}");
        Self {
            abnormal: format!("noise_reduce.abnormal:{scope}"),
            alerts: format!("noise_reduce.alert:{scope}"),
            total: format!("noise_reduce.total:{scope}"),
            lock: format!("noise_reduce.lock:{scope}"),
            execute_lock: format!("noise_reduce.execute_lock:{scope}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NoiseDecision {
    /// Another worker holds the window or already evaluated it.
    Skipped,
    Notified { percent: f64, actions: usize },
    Suppressed { percent: f64, alerts: usize },
}

pub struct NoiseReducer {
    kv: Arc<dyn KvStore>,
    docs: Arc<dyn DocumentStore>,
    queue: Arc<dyn TaskQueue>,
    settings: NoiseSettings,
}

impl NoiseReducer {
    pub fn new(
        kv: Arc<dyn KvStore>,
        docs: Arc<dyn DocumentStore>,
        queue: Arc<dyn TaskQueue>,
        settings: NoiseSettings,
    ) -> Self {
        Self {
            kv,
            docs,
            queue,
            settings,
        }
    }

    /// Counts one signal, abnormal or not, in the window's baseline.
    pub async fn track_signal(
        &self,
        strategy_id: i64,
        config: &NoiseReduceConfig,
        dimensions: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let keys = WindowKeys::new(strategy_id, &noise_dimension_hash(config));
        self.kv
            .zadd(
                &keys.total,
                &[(score_of(now), dimension_value_hash(config, dimensions))],
            )
            .await?;
        self.kv
            .expire(&keys.total, self.retention_secs(config))
            .await?;
        Ok(())
    }

    fn retention_secs(&self, config: &NoiseReduceConfig) -> u64 {
        config.window_secs * 2 + self.settings.expire_grace_secs
    }

    /// Holds `parent` in the window of `alert`'s noise signature, opening
    /// the window when this is its first abnormal signal. Returns whether a
    /// window was opened.
    pub async fn hold(
        &self,
        alert: &Alert,
        parent: &ActionInstance,
        config: &NoiseReduceConfig,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let strategy_id = alert.strategy_id.unwrap_or(0);
        let dimension_hash = noise_dimension_hash(config);
        let value_hash = dimension_value_hash(config, &alert.dimensions);
        let keys = WindowKeys::new(strategy_id, &dimension_hash);

        let member = format!("{}--{}", alert.id, parent.generate_uuid);

        // Sleep first: once the alert is tracked the window owns the action,
        // so nothing after the append may fail the hold.
        self.docs
            .update_action_status(std::slice::from_ref(&parent.id), ActionStatus::Sleep)
            .await?;

        let lock = ServiceLock::new(self.kv.clone(), keys.lock.clone(), self.settings.lock_ttl_secs);
        let opened = match lock.acquire().await {
            Ok(true) => {
                // append before releasing so a concurrent signal sees a non-empty window
                let result = async {
                    let opened = self
                        .open_if_quiet(&keys, strategy_id, &dimension_hash, config, now)
                        .await?;
                    self.append_signal(&keys, config, &value_hash, &member, now).await?;
                    Ok::<bool, ConvergeError>(opened)
                }
                .await;
                if let Err(e) = lock.release().await {
                    tracing::warn!(lock = lock.key(), error = %e, "Failed to release noise window lock");
                }
                result?
            }
            Ok(false) => {
                tracing::debug!(strategy_id, "Noise window lock held elsewhere");
                self.append_signal(&keys, config, &value_hash, &member, now).await?;
                false
            }
            Err(e) => {
                tracing::warn!(strategy_id, error = %e, "Noise window lock unavailable");
                self.append_signal(&keys, config, &value_hash, &member, now).await?;
                false
            }
        };

        let log = AlertLog::new(
            vec![alert.id.clone()],
            AlertLogOp::NoiseReduceHold,
            format!(
                "action {} held by noise reduction ({}% over {}s)",
                parent.id, config.count, config.window_secs
            ),
            now,
        );
        if let Err(e) = self.docs.bulk_create_logs(&[log]).await {
            tracing::warn!(alert_id = %alert.id, error = %e, "Failed to write noise hold log");
        }

        tracing::info!(
            alert_id = %alert.id,
            action_id = %parent.id,
            strategy_id,
            opened,
            "Action held for noise reduction"
        );
        Ok(opened)
    }

    /// The alert-tracking entry goes in last: an error before it leaves the
    /// action untracked, anything after it is only logged.
    async fn append_signal(
        &self,
        keys: &WindowKeys,
        config: &NoiseReduceConfig,
        value_hash: &str,
        member: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let score = score_of(now);
        let ttl = self.retention_secs(config);
        self.kv.zadd(&keys.abnormal, &[(score, value_hash.to_string())]).await?;
        self.kv.expire(&keys.abnormal, ttl).await?;
        self.kv.zadd(&keys.total, &[(score, value_hash.to_string())]).await?;
        self.kv.zadd(&keys.alerts, &[(score, member.to_string())]).await?;
        if let Err(e) = self.kv.expire(&keys.alerts, ttl).await {
            tracing::warn!(key = %keys.alerts, error = %e, "Failed to refresh noise tracking TTL");
        }
        Ok(())
    }

    async fn open_if_quiet(
        &self,
        keys: &WindowKeys,
        strategy_id: i64,
        dimension_hash: &str,
        config: &NoiseReduceConfig,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let pending = self
            .kv
            .zrange_by_score(&keys.abnormal, f64::NEG_INFINITY, f64::INFINITY)
            .await?;
        if !pending.is_empty() {
            return Ok(false);
        }

        let window_end = now + Duration::seconds(config.window_secs as i64);
        let task = NoiseWindowTask {
            strategy_id,
            noise_dimension_hash: dimension_hash.to_string(),
            window_begin: now,
            window_end,
            threshold: config.count,
        };
        let expires = window_end + Duration::seconds(self.settings.expire_grace_secs as i64);
        self.queue
            .schedule(Task::EvaluateNoiseWindow(task), window_end, Some(expires))
            .await?;
        tracing::info!(strategy_id, %window_end, "Noise reduction window opened");
        Ok(true)
    }

    /// Decides a window once. Redelivery and concurrent workers are turned
    /// into [`NoiseDecision::Skipped`].
    pub async fn evaluate(&self, task: &NoiseWindowTask, now: DateTime<Utc>) -> Result<NoiseDecision> {
        let keys = WindowKeys::new(task.strategy_id, &task.noise_dimension_hash);
        let lock = ServiceLock::new(
            self.kv.clone(),
            keys.execute_lock.clone(),
            self.settings.lock_ttl_secs,
        );
        if !lock.acquire().await? {
            tracing::debug!(strategy_id = task.strategy_id, "Noise window already being evaluated");
            return Ok(NoiseDecision::Skipped);
        }
        let decision = self.evaluate_locked(&keys, task, now).await;
        if let Err(e) = lock.release().await {
            tracing::warn!(lock = lock.key(), error = %e, "Failed to release noise evaluation lock");
        }
        decision
    }

    async fn evaluate_locked(
        &self,
        keys: &WindowKeys,
        task: &NoiseWindowTask,
        now: DateTime<Utc>,
    ) -> Result<NoiseDecision> {
        let done_key = format!(
            "noise_reduce.done:{}:{}:{}",
            task.strategy_id,
            task.noise_dimension_hash,
            task.window_begin.timestamp_millis()
        );
        let done_ttl = ((task.window_end - task.window_begin).num_seconds().max(0) as u64) * 2
            + self.settings.expire_grace_secs;
        let first = self
            .kv
            .set_nx(std::slice::from_ref(&done_key), "1", done_ttl.max(60))
            .await?
            .first()
            .copied()
            .unwrap_or(false);
        if !first {
            tracing::info!(strategy_id = task.strategy_id, "Noise window already evaluated, skipped");
            return Ok(NoiseDecision::Skipped);
        }

        let (begin, end) = (score_of(task.window_begin), score_of(task.window_end));
        let abnormal = self.kv.zrange_by_score(&keys.abnormal, begin, end).await?;
        let total = self.kv.zrange_by_score(&keys.total, begin, end).await?;
        let tracked = self.kv.zrange_by_score(&keys.alerts, begin, end).await?;

        let percent = if total.is_empty() {
            0.0
        } else {
            100.0 * abnormal.len() as f64 / total.len() as f64
        };

        self.kv
            .delete(&[keys.abnormal.clone(), keys.alerts.clone()])
            .await?;
        self.kv
            .zrem_range_by_score(&keys.total, f64::NEG_INFINITY, begin)
            .await?;

        let mut alert_ids = BTreeSet::new();
        let mut uuids = BTreeSet::new();
        for member in &tracked {
            if let Some((alert_id, uuid)) = member.split_once("--") {
                alert_ids.insert(alert_id.to_string());
                uuids.insert(uuid.to_string());
            }
        }
        let alert_ids: Vec<String> = alert_ids.into_iter().collect();
        let uuids: Vec<String> = uuids.into_iter().collect();

        let parents = self.docs.actions_by_uuid(&uuids).await?;
        let parent_ids: Vec<String> = parents.iter().map(|a| a.id.clone()).collect();
        let existing = self.docs.child_actions(&parent_ids).await?;

        if percent >= f64::from(task.threshold) {
            let with_children: BTreeSet<&str> = existing
                .iter()
                .filter_map(|c| c.parent_id.as_deref())
                .collect();
            let fresh: Vec<ActionInstance> = parents
                .iter()
                .filter(|p| !with_children.contains(p.id.as_str()))
                .flat_map(|p| p.materialize_children(now))
                .collect();
            if !fresh.is_empty() {
                self.docs.insert_actions(&fresh).await?;
            }

            let mut action_ids = parent_ids;
            action_ids.extend(existing.iter().chain(fresh.iter()).map(|a| a.id.clone()));
            let actions = action_ids.len();
            self.queue
                .schedule(
                    Task::ExecuteActions {
                        action_ids,
                        need_notice: true,
                    },
                    now,
                    None,
                )
                .await?;
            tracing::info!(
                strategy_id = task.strategy_id,
                percent,
                threshold = task.threshold,
                alerts = alert_ids.len(),
                actions,
                "Noise window notifies"
            );
            return Ok(NoiseDecision::Notified { percent, actions });
        }

        if !alert_ids.is_empty() {
            self.docs
                .append_handle_stage(&alert_ids, NOISE_REDUCE_STAGE)
                .await?;
            self.docs
                .bulk_create_logs(&[AlertLog::new(
                    alert_ids.clone(),
                    AlertLogOp::NoiseReduceSuppress,
                    format!(
                        "noise reduction suppressed {} alerts: abnormal {:.1}% below {}%",
                        alert_ids.len(),
                        percent,
                        task.threshold
                    ),
                    now,
                )
                .with_count(alert_ids.len() as u64)])
                .await?;
        }

        let mut action_ids = parent_ids;
        action_ids.extend(existing.into_iter().map(|a| a.id));
        self.queue
            .schedule(
                Task::ExecuteActions {
                    action_ids,
                    need_notice: false,
                },
                now,
                None,
            )
            .await?;
        tracing::info!(
            strategy_id = task.strategy_id,
            percent,
            threshold = task.threshold,
            alerts = alert_ids.len(),
            "Noise window suppressed"
        );
        Ok(NoiseDecision::Suppressed {
            percent,
            alerts: alert_ids.len(),
        })
    }
}
