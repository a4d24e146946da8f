//! Time-windowed dimension index over action and converge instances.
//!
//! Every compared dimension value of an instance gets its own sorted-set
//! bucket; a condition matches the instances present in at least one value
//! bucket of *every* dimension it names. Sub-convergence skips the
//! intersection and uses one composite bucket per label combination.

use alarmflow_common::action::ActionInstance;
use alarmflow_common::alert::Alert;
use alarmflow_common::hash;
use alarmflow_common::strategy::{ActionConfig, ActionSignal, ConvergeCondition};
use alarmflow_storage::kv::score_of;
use alarmflow_storage::KvStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::error::Result;

/// Dimensions written to the index for every instance.
pub const COMPARED_DIMENSIONS: &[&str] = &[
    "strategy_id",
    "alert_level",
    "signal",
    "bk_biz_id",
    "notice_receiver",
    "notice_way",
    "alert_name",
    "dimensions",
    "action_id",
    "target",
];

/// Labels whose joined values key the sub-convergence bucket.
pub const SUB_CONVERGE_LABELS: &[&str] = &[
    "bk_biz_id",
    "notice_receiver",
    "notice_way",
    "alert_level",
    "signal",
];

/// Entries older than this are never kept, whatever the retention.
const SWEEP_HORIZON_DAYS: i64 = 365;

/// Value of the per-dimension bucket meaning "any value".
const ANY_VALUE: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceType {
    Action,
    Converge,
}

impl std::fmt::Display for InstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceType::Action => write!(f, "action"),
            InstanceType::Converge => write!(f, "converge"),
        }
    }
}

/// One instance as the index sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergeInstance {
    pub instance_type: InstanceType,
    pub id: String,
    pub strategy_id: Option<i64>,
    pub create_time: DateTime<Utc>,
    /// 比对维度 -> 取值列表
    pub context: BTreeMap<String, Vec<String>>,
}

impl ConvergeInstance {
    pub fn from_action(action: &ActionInstance) -> Self {
        Self {
            instance_type: InstanceType::Action,
            id: action.id.clone(),
            strategy_id: action.strategy_id,
            create_time: action.create_time,
            context: action.converge_context.clone(),
        }
    }

    /// Sorted-set member: `{instance_type}_{instance_id}`.
    pub fn member(&self) -> String {
        format!("{}_{}", self.instance_type, self.id)
    }
}

/// Comparison context of an action created for `alert`.
pub fn action_context(
    alert: &Alert,
    config: &ActionConfig,
    signal: ActionSignal,
) -> BTreeMap<String, Vec<String>> {
    let mut ctx = BTreeMap::new();
    ctx.insert(
        "strategy_id".to_string(),
        vec![alert.strategy_id.unwrap_or(0).to_string()],
    );
    ctx.insert("alert_level".to_string(), vec![alert.severity.level().to_string()]);
    ctx.insert("signal".to_string(), vec![signal.to_string()]);
    ctx.insert("bk_biz_id".to_string(), vec![alert.biz_id.to_string()]);
    let mut receivers = config.receivers.clone();
    receivers.sort();
    ctx.insert("notice_receiver".to_string(), receivers);
    let mut ways = config.notice_ways.clone();
    ways.sort();
    ctx.insert("notice_way".to_string(), ways);
    ctx.insert("alert_name".to_string(), vec![alert.alert_name.clone()]);
    ctx.insert("dimensions".to_string(), alert.dimension_pairs());
    ctx.insert("action_id".to_string(), vec![config.id.to_string()]);
    ctx.insert("target".to_string(), vec![alert.target_ip.clone()]);
    ctx.retain(|_, values| {
        values.retain(|v| !v.is_empty());
        !values.is_empty()
    });
    ctx
}

/// Bucket of one dimension value. Strategy id 0 stands for "no strategy".
pub fn dimension_key(strategy_id: Option<i64>, dimension: &str, value: &str) -> String {
    format!(
        "converge.dimension:{}:{dimension}:{value}",
        strategy_id.unwrap_or(0)
    )
}

/// Composite bucket shared by every strategy with the same label values.
pub fn sub_converge_key(context: &BTreeMap<String, Vec<String>>) -> String {
    let parts: Vec<String> = SUB_CONVERGE_LABELS
        .iter()
        .map(|label| {
            context
                .get(*label)
                .map(|values| values.join(","))
                .unwrap_or_default()
        })
        .collect();
    format!("converge.sub:{}", hash::digest(&parts))
}

pub struct ConvergenceIndex {
    kv: Arc<dyn KvStore>,
    retention_secs: u64,
}

impl ConvergenceIndex {
    pub fn new(kv: Arc<dyn KvStore>, retention_secs: u64) -> Self {
        Self { kv, retention_secs }
    }

    /// Sweeps the bounded expiry range, appends, refreshes the TTL.
    async fn append(&self, key: &str, member: &str, score: f64, now: DateTime<Utc>) -> Result<()> {
        let horizon = now - Duration::days(SWEEP_HORIZON_DAYS);
        let cutoff = now - Duration::seconds(self.retention_secs as i64);
        if cutoff > horizon {
            self.kv
                .zrem_range_by_score(key, score_of(horizon), score_of(cutoff))
                .await?;
        }
        self.kv.zadd(key, &[(score, member.to_string())]).await?;
        self.kv.expire(key, self.retention_secs).await?;
        Ok(())
    }

    /// Writes `instance` into the bucket of every compared dimension value it
    /// carries, plus the dimension's any-value bucket. Returns the number of
    /// buckets touched.
    pub async fn record_instance(&self, instance: &ConvergeInstance, now: DateTime<Utc>) -> Result<usize> {
        let member = instance.member();
        let score = score_of(instance.create_time);
        let mut written = 0;
        for dimension in COMPARED_DIMENSIONS {
            let Some(values) = instance.context.get(*dimension) else {
                continue;
            };
            let values: BTreeSet<&str> = values
                .iter()
                .map(String::as_str)
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                continue;
            }
            for value in values.into_iter().chain(std::iter::once(ANY_VALUE)) {
                let key = dimension_key(instance.strategy_id, dimension, value);
                self.append(&key, &member, score, now).await?;
                written += 1;
            }
        }
        tracing::debug!(member = %member, buckets = written, "Instance recorded in convergence index");
        Ok(written)
    }

    /// Members present, within `[start, end]`, in every dimension of
    /// `condition`. An empty condition matches nothing.
    pub async fn match_condition(
        &self,
        strategy_id: Option<i64>,
        condition: &[ConvergeCondition],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let mut matched: Option<HashSet<String>> = None;
        for cond in condition {
            let values: Vec<&str> = if cond.value.is_empty() {
                vec![ANY_VALUE]
            } else {
                cond.value.iter().map(String::as_str).collect()
            };

            let mut union = HashSet::new();
            for value in values {
                let key = dimension_key(strategy_id, &cond.dimension, value);
                union.extend(
                    self.kv
                        .zrange_by_score(&key, score_of(start), score_of(end))
                        .await?,
                );
            }

            let narrowed = match matched {
                None => union,
                Some(prev) => prev.intersection(&union).cloned().collect(),
            };
            if narrowed.is_empty() {
                return Ok(HashSet::new());
            }
            matched = Some(narrowed);
        }
        Ok(matched.unwrap_or_default())
    }

    pub async fn record_sub_instance(&self, instance: &ConvergeInstance, now: DateTime<Utc>) -> Result<()> {
        let key = sub_converge_key(&instance.context);
        self.append(&key, &instance.member(), score_of(instance.create_time), now)
            .await
    }

    /// Members of the sub-convergence bucket for `context` within `[start, end]`.
    pub async fn match_sub_condition(
        &self,
        context: &BTreeMap<String, Vec<String>>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let key = sub_converge_key(context);
        Ok(self
            .kv
            .zrange_by_score(&key, score_of(start), score_of(end))
            .await?
            .into_iter()
            .collect())
    }

    /// Oldest member of the sub-convergence bucket for `context` within
    /// `[start, end]`. Ties on score resolve by member, as on every worker.
    pub async fn first_sub_instance(
        &self,
        context: &BTreeMap<String, Vec<String>>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let key = sub_converge_key(context);
        Ok(self
            .kv
            .zrange_by_score(&key, score_of(start), score_of(end))
            .await?
            .into_iter()
            .next())
    }
}
