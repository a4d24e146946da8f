use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::AlertKey;

/// Deferred evaluation of one noise-reduction window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseWindowTask {
    pub strategy_id: i64,
    pub noise_dimension_hash: String,
    pub window_begin: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Abnormal percentage at or above which the window notifies.
    pub threshold: u32,
}

/// Unit of work carried by the task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    ManageAlerts { keys: Vec<AlertKey> },
    Converge { action_id: String, attempt: u32 },
    EvaluateNoiseWindow(NoiseWindowTask),
    ExecuteActions { action_ids: Vec<String>, need_notice: bool },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::ManageAlerts { .. } => "manage_alerts",
            Task::Converge { .. } => "converge",
            Task::EvaluateNoiseWindow(_) => "evaluate_noise_window",
            Task::ExecuteActions { .. } => "execute_actions",
        }
    }
}
