use alarmflow_common::action::ActionStatus;
use alarmflow_common::task::Task;
use alarmflow_converge::{ConvergeOutcome, ConvergeProcessor, NoiseDecision, NoiseReducer};
use alarmflow_storage::MemoryTaskQueue;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::checkers::CheckerRegistry;
use crate::error::Result;
use crate::manager::AlertLifecycleManager;
use crate::session::WorkerSession;
use crate::shield::ShieldMatcher;
use crate::{Backends, CoreSettings};

/// Executes the tasks the core schedules on the queue. One worker owns one
/// [`WorkerSession`].
pub struct TaskWorker {
    backends: Backends,
    session: WorkerSession,
    manager: AlertLifecycleManager,
    converge: ConvergeProcessor,
    noise: Arc<NoiseReducer>,
}

impl TaskWorker {
    pub fn new(
        backends: Backends,
        shields: Arc<dyn ShieldMatcher>,
        registry: &CheckerRegistry,
        settings: &CoreSettings,
    ) -> Self {
        let manager = AlertLifecycleManager::new(backends.clone(), shields, registry, settings);
        let noise = manager.dispatcher().noise().clone();
        let converge = ConvergeProcessor::new(
            backends.kv.clone(),
            backends.docs.clone(),
            backends.queue.clone(),
            settings.converge.clone(),
        );
        Self {
            backends,
            session: WorkerSession::new(),
            manager,
            converge,
            noise,
        }
    }

    pub fn session(&self) -> &WorkerSession {
        &self.session
    }

    pub fn manager(&self) -> &AlertLifecycleManager {
        &self.manager
    }

    pub async fn handle(&mut self, task: Task, now: DateTime<Utc>) -> Result<()> {
        tracing::debug!(task = task.name(), session_id = %self.session.session_id, "Handling task");
        match task {
            Task::ManageAlerts { keys } => {
                let batch = self.manager.settings().batch_size.max(1);
                for chunk in keys.chunks(batch) {
                    self.manager.manage(chunk, &mut self.session, now).await?;
                }
            }
            Task::Converge { action_id, attempt } => {
                let outcome = self.converge.process(&action_id, attempt, now).await;
                if outcome == ConvergeOutcome::Abandoned {
                    tracing::warn!(action_id = %action_id, attempt, "Convergence abandoned");
                }
            }
            Task::EvaluateNoiseWindow(window) => match self.noise.evaluate(&window, now).await? {
                NoiseDecision::Skipped => {}
                NoiseDecision::Notified { percent, actions } => tracing::info!(
                    strategy_id = window.strategy_id,
                    percent,
                    actions,
                    "Noise window released"
                ),
                NoiseDecision::Suppressed { percent, alerts } => tracing::info!(
                    strategy_id = window.strategy_id,
                    percent,
                    alerts,
                    "Noise window suppressed"
                ),
            },
            Task::ExecuteActions {
                action_ids,
                need_notice,
            } => self.execute_actions(&action_ids, need_notice, now).await?,
        }
        Ok(())
    }

    /// Hands actions to the execution adapters: released actions become
    /// `Running`, suppressed ones `Skipped`. Notice parents released without
    /// children get one child per notice way first.
    async fn execute_actions(&self, action_ids: &[String], need_notice: bool, now: DateTime<Utc>) -> Result<()> {
        let docs = &self.backends.docs;
        let actions = docs.get_actions(action_ids).await?;
        let mut ids: Vec<String> = actions.iter().map(|a| a.id.clone()).collect();

        if need_notice {
            let parents: Vec<String> = actions.iter().filter(|a| a.is_parent).map(|a| a.id.clone()).collect();
            let with_children: HashSet<String> = docs
                .child_actions(&parents)
                .await?
                .into_iter()
                .filter_map(|c| c.parent_id)
                .collect();
            let children: Vec<_> = actions
                .iter()
                .filter(|a| a.is_parent && !with_children.contains(&a.id))
                .flat_map(|a| a.materialize_children(now))
                .collect();
            if !children.is_empty() {
                docs.insert_actions(&children).await?;
                ids.extend(children.iter().map(|c| c.id.clone()));
            }
        }

        let status = if need_notice {
            ActionStatus::Running
        } else {
            ActionStatus::Skipped
        };
        let updated = docs.update_action_status(&ids, status).await?;
        tracing::info!(count = updated, ?status, "Actions handed to execution");
        Ok(())
    }

    /// Queues a lifecycle cycle for every live alert, `batch_size` alerts
    /// per task. Returns the number of alerts scheduled.
    pub async fn scan_active(&self, now: DateTime<Utc>) -> Result<usize> {
        let settings = self.manager.settings();
        let keys = self
            .backends
            .docs
            .list_active_alert_keys(settings.scan_limit)
            .await?;
        for chunk in keys.chunks(settings.batch_size.max(1)) {
            self.backends
                .queue
                .schedule(Task::ManageAlerts { keys: chunk.to_vec() }, now, None)
                .await?;
        }
        Ok(keys.len())
    }

    /// Runs every task of `queue` due at `now`, including tasks those tasks
    /// schedule for `now`. A failing task is logged and dropped.
    pub async fn run_due(&mut self, queue: &MemoryTaskQueue, now: DateTime<Utc>) -> usize {
        let mut handled = 0;
        loop {
            let due = queue.take_due(now).await;
            if due.is_empty() {
                return handled;
            }
            for task in due {
                let name = task.name();
                handled += 1;
                if let Err(e) = self.handle(task, now).await {
                    tracing::error!(task = name, error = %e, "Task failed");
                }
            }
        }
    }
}
