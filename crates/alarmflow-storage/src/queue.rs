use alarmflow_common::task::Task;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::Result;

/// Asynchronous task queue. Tasks run no earlier than `eta` and are dropped
/// undelivered once `expires` has passed.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn schedule(
        &self,
        task: Task,
        eta: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub task: Task,
    pub eta: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
}

/// In-process [`TaskQueue`] polled by the worker loop.
#[derive(Default)]
pub struct MemoryTaskQueue {
    pending: Mutex<Vec<ScheduledTask>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every task due at `now`, in eta order. Expired
    /// tasks are discarded.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<Task> {
        let mut pending = self.pending.lock().await;
        let (mut due, rest): (Vec<ScheduledTask>, Vec<ScheduledTask>) =
            pending.drain(..).partition(|t| t.eta <= now);
        *pending = rest;
        drop(pending);

        due.sort_by_key(|t| t.eta);
        due.into_iter()
            .filter_map(|t| match t.expires {
                Some(expires) if expires < now => {
                    tracing::warn!(task = t.task.name(), %expires, "Task expired before delivery, dropped");
                    None
                }
                _ => Some(t.task),
            })
            .collect()
    }

    pub async fn pending(&self) -> Vec<ScheduledTask> {
        self.pending.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Earliest eta among pending tasks.
    pub async fn next_eta(&self) -> Option<DateTime<Utc>> {
        self.pending.lock().await.iter().map(|t| t.eta).min()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn schedule(
        &self,
        task: Task,
        eta: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.pending.lock().await.push(ScheduledTask { task, eta, expires });
        Ok(())
    }
}
