use alarmflow_common::action::{ActionInstance, ActionStatus, AlertLog, AlertLogOp};
use alarmflow_common::hash;
use alarmflow_common::strategy::ConvergeCondition;
use alarmflow_common::task::Task;
use alarmflow_storage::{DocumentStore, KvStore, TaskQueue};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ConvergeError, Result};
use crate::index::{ConvergeInstance, ConvergenceIndex, InstanceType, SUB_CONVERGE_LABELS};

/// Condition value standing for the action's own values of a dimension.
const SELF_VALUE: &str = "self";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergeSettings {
    /// How long index entries are kept.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for ConvergeSettings {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_retention_secs() -> u64 {
    86_400
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergeOutcome {
    /// Not enough similar instances: queued for execution.
    Released,
    /// Merged under `converge_id`. The action that opened the converge
    /// instance (`created`) is released as the batch notice, later ones are
    /// skipped.
    Converged {
        converge_id: String,
        matched: usize,
        created: bool,
    },
    /// Opened `converge_id` while an older converge instance with the same
    /// sub-convergence labels was live: merged into `batch_id` and skipped.
    SubConverged { converge_id: String, batch_id: String },
    /// A store call failed; the task was rescheduled as `attempt`.
    Retrying { attempt: u32 },
    /// Retries exhausted or the action is gone.
    Abandoned,
}

/// Replaces `"self"` values with the action's own context values.
///
/// Returns `None` when a `"self"` dimension is absent from the context: such
/// a condition can never match.
pub fn resolve_condition(
    condition: &[ConvergeCondition],
    context: &BTreeMap<String, Vec<String>>,
) -> Option<Vec<ConvergeCondition>> {
    condition
        .iter()
        .map(|cond| {
            if !cond.value.iter().any(|v| v == SELF_VALUE) {
                return Some(cond.clone());
            }
            let own = context.get(&cond.dimension).filter(|v| !v.is_empty())?;
            let mut value: Vec<String> = cond
                .value
                .iter()
                .filter(|v| *v != SELF_VALUE)
                .cloned()
                .chain(own.iter().cloned())
                .collect();
            value.sort();
            value.dedup();
            Some(ConvergeCondition {
                dimension: cond.dimension.clone(),
                value,
            })
        })
        .collect()
}

/// Same inputs in the same window give the same id on every worker.
fn converge_id(
    strategy_id: Option<i64>,
    action_config_id: i64,
    condition: &[ConvergeCondition],
    now: DateTime<Utc>,
    timedelta_secs: u64,
) -> String {
    let window = now.timestamp() / timedelta_secs.max(1) as i64;
    let mut parts = vec![
        strategy_id.unwrap_or(0).to_string(),
        action_config_id.to_string(),
        window.to_string(),
    ];
    let mut conds: Vec<String> = condition
        .iter()
        .map(|c| format!("{}={}", c.dimension, c.value.join(",")))
        .collect();
    conds.sort();
    parts.extend(conds);
    hash::digest(&parts)
}

/// Runs the convergence task for one action: record it in the index, look
/// for similar instances, then merge or release.
pub struct ConvergeProcessor {
    index: ConvergenceIndex,
    kv: Arc<dyn KvStore>,
    docs: Arc<dyn DocumentStore>,
    queue: Arc<dyn TaskQueue>,
    settings: ConvergeSettings,
}

impl ConvergeProcessor {
    pub fn new(
        kv: Arc<dyn KvStore>,
        docs: Arc<dyn DocumentStore>,
        queue: Arc<dyn TaskQueue>,
        settings: ConvergeSettings,
    ) -> Self {
        Self {
            index: ConvergenceIndex::new(kv.clone(), settings.retention_secs),
            kv,
            docs,
            queue,
            settings,
        }
    }

    /// Never fails: store errors reschedule the task with a fixed delay, at
    /// most `max_retries` times.
    pub async fn process(&self, action_id: &str, attempt: u32, now: DateTime<Utc>) -> ConvergeOutcome {
        let err = match self.try_process(action_id, now).await {
            Ok(outcome) => return outcome,
            Err(e) => e,
        };

        if !err.is_retryable() {
            tracing::warn!(action_id, error = %err, "Convergence skipped");
            return ConvergeOutcome::Abandoned;
        }
        if attempt >= self.settings.max_retries {
            tracing::error!(action_id, attempt, error = %err, "Convergence retries exhausted");
            return ConvergeOutcome::Abandoned;
        }

        let next = attempt + 1;
        let eta = now + Duration::seconds(self.settings.retry_delay_secs as i64);
        let task = Task::Converge {
            action_id: action_id.to_string(),
            attempt: next,
        };
        match self.queue.schedule(task, eta, None).await {
            Ok(()) => {
                tracing::warn!(action_id, attempt = next, error = %err, "Convergence failed, retry scheduled");
                ConvergeOutcome::Retrying { attempt: next }
            }
            Err(e) => {
                tracing::error!(action_id, error = %e, "Failed to reschedule convergence");
                ConvergeOutcome::Abandoned
            }
        }
    }

    async fn try_process(&self, action_id: &str, now: DateTime<Utc>) -> Result<ConvergeOutcome> {
        let action = self
            .docs
            .get_actions(&[action_id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ConvergeError::ActionMissing(action_id.to_string()))?;

        let Some(config) = action.converge.as_ref().filter(|c| c.is_enabled) else {
            return self.release(&action, now).await;
        };

        let instance = ConvergeInstance::from_action(&action);
        self.index.record_instance(&instance, now).await?;

        let Some(condition) = resolve_condition(&config.condition, &action.converge_context) else {
            tracing::debug!(action_id, "Convergence condition references a missing dimension");
            return self.release(&action, now).await;
        };

        let start = now - Duration::seconds(config.timedelta_secs as i64);
        let mut matched = self
            .index
            .match_condition(action.strategy_id, &condition, start, now)
            .await?;
        matched.remove(&instance.member());

        if matched.len() + 1 < config.count {
            return self.release(&action, now).await;
        }

        let converge_id = converge_id(
            action.strategy_id,
            action.action_config_id,
            &condition,
            now,
            config.timedelta_secs,
        );
        let created = self
            .kv
            .set_nx(
                &[format!("converge.instance:{converge_id}")],
                &action.id,
                config.timedelta_secs.max(60),
            )
            .await?
            .first()
            .copied()
            .unwrap_or(false);

        let batch_id = if created && config.need_sub_converge {
            self.sub_converge(&action, &converge_id, start, now).await?
        } else {
            None
        };
        let merged_into = batch_id.as_deref().unwrap_or(&converge_id);
        self.docs.set_action_converge(&action.id, merged_into).await?;

        let content = match &batch_id {
            Some(batch_id) => format!(
                "action {} sub-converged into {batch_id} through {converge_id}",
                action.id
            ),
            None => format!(
                "action {} converged into {converge_id} with {} similar instances",
                action.id,
                matched.len()
            ),
        };
        self.docs
            .bulk_create_logs(&[AlertLog::new(
                vec![action.alert_id.clone()],
                AlertLogOp::Converge,
                content,
                now,
            )
            .with_count(matched.len() as u64 + 1)])
            .await?;

        // one notice per batch: the opener carries it, every later member is dropped
        if created && batch_id.is_none() {
            self.queue
                .schedule(
                    Task::ExecuteActions {
                        action_ids: vec![action.id.clone()],
                        need_notice: true,
                    },
                    now,
                    None,
                )
                .await?;
        } else {
            self.docs
                .update_action_status(std::slice::from_ref(&action.id), ActionStatus::Skipped)
                .await?;
        }

        tracing::info!(
            action_id = %action.id,
            alert_id = %action.alert_id,
            converge_id = %converge_id,
            batch_id = %merged_into,
            matched = matched.len(),
            created,
            "Action converged"
        );
        Ok(match batch_id {
            Some(batch_id) => ConvergeOutcome::SubConverged {
                converge_id,
                batch_id,
            },
            None => ConvergeOutcome::Converged {
                converge_id,
                matched: matched.len(),
                created,
            },
        })
    }

    /// Registers a new converge instance in the cross-strategy bucket and
    /// returns the older converge instance it merges into, if any.
    async fn sub_converge(
        &self,
        action: &ActionInstance,
        converge_id: &str,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let context: BTreeMap<String, Vec<String>> = SUB_CONVERGE_LABELS
            .iter()
            .filter_map(|label| {
                action
                    .converge_context
                    .get(*label)
                    .map(|v| (label.to_string(), v.clone()))
            })
            .collect();
        let instance = ConvergeInstance {
            instance_type: InstanceType::Converge,
            id: converge_id.to_string(),
            strategy_id: action.strategy_id,
            create_time: now,
            context,
        };
        self.index.record_sub_instance(&instance, now).await?;

        // the bucket's oldest instance owns the batch
        let head = self
            .index
            .first_sub_instance(&instance.context, start, now)
            .await?;
        let batch_id = head
            .filter(|member| *member != instance.member())
            .and_then(|member| {
                member
                    .strip_prefix(&format!("{}_", InstanceType::Converge))
                    .map(str::to_string)
            });
        tracing::debug!(converge_id, batch_id = ?batch_id, "Converge instance joined sub-convergence bucket");
        Ok(batch_id)
    }

    async fn release(&self, action: &ActionInstance, now: DateTime<Utc>) -> Result<ConvergeOutcome> {
        self.queue
            .schedule(
                Task::ExecuteActions {
                    action_ids: vec![action.id.clone()],
                    need_notice: true,
                },
                now,
                None,
            )
            .await?;
        tracing::debug!(action_id = %action.id, "Action released for execution");
        Ok(ConvergeOutcome::Released)
    }
}
