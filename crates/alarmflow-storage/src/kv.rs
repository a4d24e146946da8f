use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};

/// Sorted-set score for a point in time (seconds, millisecond precision).
pub fn score_of(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

/// Shared key-value store (Redis-like). Every operation is atomic on its own;
/// callers never rely on read-modify-write across calls.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Deletes the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Sets a TTL on an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// `EXPIRE key ttl NX`: sets a TTL only when the key has none.
    /// Returns whether it was set.
    async fn expire_nx(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Atomically increments an integer counter, creating it at 0.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// `SET key value NX EX ttl` for every key in one round trip.
    /// Returns, per key, whether it was set.
    async fn set_nx(&self, keys: &[String], value: &str, ttl_secs: u64) -> Result<Vec<bool>>;

    /// Deletes `key` only if it currently holds `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;

    /// Refreshes the TTL of `key` only if it currently holds `value`.
    async fn expire_if_equals(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>>;

    async fn hset_many(&self, key: &str, pairs: &[(String, String)]) -> Result<()>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64>;

    /// Adds or re-scores members, returning the number of new members.
    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64>;

    /// Members with `min <= score <= max`, ordered by score.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>>;

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64>;
}

enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    ZSet(HashMap<String, f64>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Backend(format!("WRONGTYPE operation against key '{key}'"))
}

/// In-process [`KvStore`] used by tests and single-node deployments.
///
/// TTLs follow the wall clock. [`MemoryKvStore::set_unavailable`] makes
/// every call fail with [`StoreError::Unavailable`] to exercise fail-open
/// paths.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory kv store switched off".into()));
        }
        Ok(())
    }

    /// Remaining TTL of a key, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
        entries.remove(key);
    }
}

fn ttl_instant(ttl_secs: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_secs(ttl_secs))
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl_secs.and_then(ttl_instant),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        Ok(entries.contains_key(key))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let mut removed = 0;
        for key in keys {
            purge_expired(&mut entries, key);
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = ttl_instant(ttl_secs);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire_nx(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at.is_none() => {
                entry.expires_at = ttl_instant(ttl_secs);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Str("0".into())));
        let Value::Str(raw) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let next = raw
            .parse::<i64>()
            .map_err(|_| StoreError::Backend(format!("value at '{key}' is not an integer")))?
            + 1;
        *raw = next.to_string();
        Ok(next)
    }

    async fn set_nx(&self, keys: &[String], value: &str, ttl_secs: u64) -> Result<Vec<bool>> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            purge_expired(&mut entries, key);
            if entries.contains_key(key) {
                results.push(false);
            } else {
                entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(value.to_string()),
                        expires_at: ttl_instant(ttl_secs),
                    },
                );
                results.push(true);
            }
        }
        Ok(results)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        let matches = matches!(entries.get(key), Some(Entry { value: Value::Str(s), .. }) if s == value);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn expire_if_equals(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) if matches!(&entry.value, Value::Str(s) if s == value) => {
                entry.expires_at = ttl_instant(ttl_secs);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(vec![None; fields.len()]),
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => Ok(fields.iter().map(|f| h.get(f).cloned()).collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hset_many(&self, key: &str, pairs: &[(String, String)]) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        let Value::Hash(h) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        for (field, value) in pairs {
            h.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(HashMap::new()),
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        let Some(entry) = entries.get_mut(key) else {
            return Ok(0);
        };
        let Value::Hash(h) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let removed = fields.iter().filter(|f| h.remove(*f).is_some()).count() as u64;
        if h.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::ZSet(HashMap::new())));
        let Value::ZSet(z) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let mut added = 0;
        for (score, member) in members {
            if z.insert(member.clone(), *score).is_none() {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::ZSet(z),
                ..
            }) => {
                let mut hits: Vec<(&String, f64)> = z
                    .iter()
                    .filter(|(_, s)| **s >= min && **s <= max)
                    .map(|(m, s)| (m, *s))
                    .collect();
                hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
                Ok(hits.into_iter().map(|(m, _)| m.clone()).collect())
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        let Some(entry) = entries.get_mut(key) else {
            return Ok(0);
        };
        let Value::ZSet(z) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let before = z.len();
        z.retain(|_, s| *s < min || *s > max);
        let removed = (before - z.len()) as u64;
        if z.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }
}
