use alarmflow_common::action::{AlertLog, AlertLogOp};
use alarmflow_common::types::{Item, Record};
use alarmflow_storage::error::Result;
use alarmflow_storage::KvStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A cached record older than `interval * STALE_INTERVALS` no longer inhibits.
const STALE_INTERVALS: i64 = 5;
/// Entries older than `interval * SWEEP_INTERVALS` are deleted on sync.
const SWEEP_INTERVALS: i64 = 10;

/// Best priority seen for one (group, dimensions) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityRecord {
    pub priority: i64,
    /// Epoch seconds of the last refresh.
    pub timestamp: i64,
}

pub fn bucket_key(priority_group_key: &str) -> String {
    format!("alarm.priority.{priority_group_key}")
}

#[derive(Default)]
struct GroupState {
    cache: HashMap<String, Option<PriorityRecord>>,
    writes: HashMap<String, PriorityRecord>,
    interval_secs: u64,
    unreadable: bool,
}

/// Arbitrates items of one priority group competing for the same record
/// dimensions: only the highest-priority recently active item propagates.
///
/// One instance covers one ingestion batch: [`check_records`] decides and
/// buffers cache refreshes, [`sync_priority`] flushes them.
///
/// [`check_records`]: PriorityInhibitor::check_records
/// [`sync_priority`]: PriorityInhibitor::sync_priority
pub struct PriorityInhibitor {
    kv: Arc<dyn KvStore>,
    groups: HashMap<String, GroupState>,
}

fn eligible(record: &Record, item: &Item) -> Option<(String, i64)> {
    let group = item.priority_group_key.as_ref()?;
    let priority = item.priority?;
    record
        .is_retained(item.id)
        .then(|| (group.clone(), priority))
}

impl PriorityInhibitor {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            groups: HashMap::new(),
        }
    }

    async fn load(&mut self, group: &str, md5s: &[String]) -> Result<()> {
        let raw = self.kv.hmget(&bucket_key(group), md5s).await?;
        let state = self.groups.entry(group.to_string()).or_default();
        for (md5, value) in md5s.iter().zip(raw) {
            let record = value.and_then(|v| match serde_json::from_str::<PriorityRecord>(&v) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(group, md5 = %md5, error = %e, "Unreadable priority record ignored");
                    None
                }
            });
            state.cache.insert(md5.clone(), record);
        }
        Ok(())
    }

    /// Decides whether `item` is inhibited on `record`'s dimensions,
    /// refreshing the cached winner when it is not.
    pub async fn is_inhibited(
        &mut self,
        record: &Record,
        item: &Item,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some((group, priority)) = eligible(record, item) else {
            return Ok(false);
        };
        let md5 = record.dimensions_md5();
        let loaded = self
            .groups
            .get(&group)
            .is_some_and(|g| g.cache.contains_key(&md5));
        if !loaded {
            self.load(&group, std::slice::from_ref(&md5)).await?;
        }
        Ok(self.decide(&group, &md5, priority, item.interval_secs, now))
    }

    fn decide(
        &mut self,
        group: &str,
        md5: &str,
        priority: i64,
        interval_secs: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let state = self.groups.entry(group.to_string()).or_default();
        state.interval_secs = state.interval_secs.max(interval_secs);
        let now_ts = now.timestamp();

        let wins = match state.cache.get(md5).copied().flatten() {
            None => true,
            Some(cached) if cached.timestamp + interval_secs as i64 * STALE_INTERVALS < now_ts => true,
            Some(cached) => priority >= cached.priority,
        };
        if !wins {
            return true;
        }
        // priority 0 is the floor and is never cached
        if priority != 0 {
            let fresh = PriorityRecord {
                priority,
                timestamp: now_ts,
            };
            state.cache.insert(md5.to_string(), Some(fresh));
            state.writes.insert(md5.to_string(), fresh);
        }
        false
    }

    /// Marks `record.inhibited[item]` for every competing item of every record.
    ///
    /// Items are evaluated highest priority first so the winner claims the
    /// dimension before lower items see it. A group whose cache cannot be
    /// read is left un-inhibited.
    pub async fn check_records(&mut self, records: &mut [Record], now: DateTime<Utc>) -> Vec<AlertLog> {
        let mut wanted: HashMap<String, HashSet<String>> = HashMap::new();
        for record in records.iter() {
            let md5 = record.dimensions_md5();
            for item in &record.items {
                if let Some((group, _)) = eligible(record, item) {
                    wanted.entry(group).or_default().insert(md5.clone());
                }
            }
        }

        for (group, md5s) in wanted {
            let md5s: Vec<String> = md5s.into_iter().collect();
            if let Err(e) = self.load(&group, &md5s).await {
                tracing::error!(group = %group, error = %e, "Failed to read priority cache, inhibition skipped");
                self.groups.entry(group).or_default().unreadable = true;
            }
        }

        let mut logs = Vec::new();
        for record in records.iter_mut() {
            let md5 = record.dimensions_md5();
            let mut candidates: Vec<(Item, String, i64)> = record
                .items
                .iter()
                .filter_map(|item| eligible(record, item).map(|(g, p)| (item.clone(), g, p)))
                .collect();
            candidates.sort_by(|a, b| b.2.cmp(&a.2));

            for (item, group, priority) in candidates {
                if self.groups.get(&group).is_some_and(|g| g.unreadable) {
                    continue;
                }
                let inhibited = self.decide(&group, &md5, priority, item.interval_secs, now);
                record.set_inhibited(item.id, inhibited);
                if inhibited {
                    tracing::info!(
                        record_id = %record.id,
                        item_id = item.id,
                        strategy_id = item.strategy_id,
                        priority,
                        group = %group,
                        "Item inhibited by a higher priority item"
                    );
                    logs.push(AlertLog::new(
                        Vec::new(),
                        AlertLogOp::PriorityInhibit,
                        format!(
                            "record {} item {} (priority {priority}) inhibited in group {group}",
                            record.id, item.id
                        ),
                        now,
                    ));
                }
            }
        }
        logs
    }

    /// Flushes buffered refreshes, sweeps long-expired entries and refreshes
    /// the TTL of every touched group. Failures are logged only: the cache
    /// is advisory.
    pub async fn sync_priority(&mut self, now: DateTime<Utc>) {
        for (group, state) in std::mem::take(&mut self.groups) {
            if state.unreadable {
                continue;
            }
            let key = bucket_key(&group);
            if let Err(e) = self.flush_group(&key, &state, now).await {
                tracing::warn!(group = %group, error = %e, "Failed to sync priority cache");
            }
        }
    }

    async fn flush_group(&self, key: &str, state: &GroupState, now: DateTime<Utc>) -> Result<()> {
        if !state.writes.is_empty() {
            let pairs = state
                .writes
                .iter()
                .map(|(md5, r)| -> Result<(String, String)> {
                    Ok((md5.clone(), serde_json::to_string(r)?))
                })
                .collect::<Result<Vec<_>>>()?;
            self.kv.hset_many(key, &pairs).await?;
        }

        let sweep_window = state.interval_secs as i64 * SWEEP_INTERVALS;
        let expired: Vec<String> = self
            .kv
            .hgetall(key)
            .await?
            .into_iter()
            .filter(|(_, v)| {
                serde_json::from_str::<PriorityRecord>(v)
                    .map(|r| r.timestamp + sweep_window < now.timestamp())
                    .unwrap_or(true)
            })
            .map(|(md5, _)| md5)
            .collect();
        if !expired.is_empty() {
            self.kv.hdel(key, &expired).await?;
        }

        self.kv.expire(key, sweep_window.max(60) as u64).await?;
        Ok(())
    }
}
