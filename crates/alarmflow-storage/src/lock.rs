//! Advisory locks on top of [`KvStore`].
//!
//! Locks are TTL-bound so a crashed holder cannot block a key forever, and
//! carry a random token so a holder only ever releases or renews its own
//! lock.

use alarmflow_common::id;
use std::sync::Arc;

use crate::error::Result;
use crate::kv::KvStore;

/// A single named lock.
pub struct ServiceLock {
    kv: Arc<dyn KvStore>,
    key: String,
    token: String,
    ttl_secs: u64,
}

impl ServiceLock {
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            kv,
            key: key.into(),
            token: id::generate_uuid(),
            ttl_secs,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Tries once. `Ok(false)` means another holder owns the lock.
    pub async fn acquire(&self) -> Result<bool> {
        let set = self
            .kv
            .set_nx(std::slice::from_ref(&self.key), &self.token, self.ttl_secs)
            .await?;
        Ok(set.first().copied().unwrap_or(false))
    }

    /// Extends the TTL if this lock is still ours.
    pub async fn renew(&self) -> Result<bool> {
        self.kv
            .expire_if_equals(&self.key, &self.token, self.ttl_secs)
            .await
    }

    pub async fn release(&self) -> Result<bool> {
        self.kv.delete_if_equals(&self.key, &self.token).await
    }

    pub async fn is_held(&self) -> Result<bool> {
        Ok(self.kv.get(&self.key).await?.as_deref() == Some(self.token.as_str()))
    }
}

/// Many locks taken in one store call, as used for per-alert batch locking.
pub struct MultiLock {
    kv: Arc<dyn KvStore>,
    token: String,
    ttl_secs: u64,
    held: Vec<String>,
}

impl MultiLock {
    pub fn new(kv: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self {
            kv,
            token: id::generate_uuid(),
            ttl_secs,
            held: Vec::new(),
        }
    }

    /// Returns, per key, whether it is now held by this lock.
    pub async fn acquire(&mut self, keys: &[String]) -> Result<Vec<bool>> {
        let results = self.kv.set_nx(keys, &self.token, self.ttl_secs).await?;
        for (key, ok) in keys.iter().zip(&results) {
            if *ok {
                self.held.push(key.clone());
            }
        }
        Ok(results)
    }

    pub fn held(&self) -> &[String] {
        &self.held
    }

    /// Releases every key this lock still owns. Returns how many were released.
    pub async fn release(&mut self) -> Result<usize> {
        let mut released = 0;
        for key in std::mem::take(&mut self.held) {
            if self.kv.delete_if_equals(&key, &self.token).await? {
                released += 1;
            }
        }
        Ok(released)
    }
}
