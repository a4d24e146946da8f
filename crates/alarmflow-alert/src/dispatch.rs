use alarmflow_common::action::{ActionInstance, ActionStatus};
use alarmflow_common::alert::Alert;
use alarmflow_common::id;
use alarmflow_common::strategy::{ActionConfig, ActionSignal, NoiseReduceConfig};
use alarmflow_common::task::Task;
use alarmflow_converge::index::action_context;
use alarmflow_converge::noise::need_noise_reduce;
use alarmflow_converge::{NoiseReducer, NoiseSettings};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::Backends;

/// What to create for one alert and action config.
pub struct ActionRequest<'a> {
    pub alert: &'a Alert,
    pub config: &'a ActionConfig,
    pub signal: ActionSignal,
    pub execute_times: u32,
    /// Overrides the config's receivers (upgrade groups).
    pub receivers: Option<Vec<String>>,
    pub noise: Option<&'a NoiseReduceConfig>,
}

/// Creates parent action rows and routes them: abnormal signals of a
/// noise-reduced strategy are held in a window, everything else goes
/// through convergence.
pub struct ActionDispatcher {
    backends: Backends,
    noise: Arc<NoiseReducer>,
}

impl ActionDispatcher {
    pub fn new(backends: Backends, noise_settings: NoiseSettings) -> Self {
        let noise = Arc::new(NoiseReducer::new(
            backends.kv.clone(),
            backends.docs.clone(),
            backends.queue.clone(),
            noise_settings,
        ));
        Self { backends, noise }
    }

    pub fn noise(&self) -> &Arc<NoiseReducer> {
        &self.noise
    }

    pub async fn dispatch(&self, req: ActionRequest<'_>, now: DateTime<Utc>) -> Result<ActionInstance> {
        let ActionRequest {
            alert,
            config,
            signal,
            execute_times,
            receivers,
            noise,
        } = req;

        let action = ActionInstance {
            id: id::next_id(),
            generate_uuid: id::generate_uuid(),
            alert_id: alert.id.clone(),
            strategy_id: alert.strategy_id,
            action_config_id: config.id,
            plugin_type: config.plugin_type,
            signal,
            status: ActionStatus::Received,
            execute_times,
            is_parent: true,
            parent_id: None,
            notice_way: None,
            notice_ways: config.notice_ways.clone(),
            receivers: receivers.unwrap_or_else(|| config.receivers.clone()),
            converge_context: action_context(alert, config, signal),
            converge: config.converge.clone(),
            converge_id: None,
            latest_anomaly_time: alert.latest_time,
            create_time: now,
        };
        self.backends
            .docs
            .insert_actions(std::slice::from_ref(&action))
            .await?;

        if let Some(noise) = noise.filter(|c| need_noise_reduce(alert, signal, Some(*c))) {
            match self.noise.hold(alert, &action, noise, now).await {
                Ok(_) => return Ok(action),
                // windows are advisory: fall through to convergence
                Err(e) => tracing::warn!(
                    alert_id = %alert.id,
                    action_id = %action.id,
                    error = %e,
                    "Noise reduction unavailable, action routed to convergence"
                ),
            }
        }

        self.backends
            .queue
            .schedule(
                Task::Converge {
                    action_id: action.id.clone(),
                    attempt: 0,
                },
                now,
                None,
            )
            .await?;
        tracing::info!(
            alert_id = %alert.id,
            action_id = %action.id,
            action_config_id = config.id,
            signal = %signal,
            execute_times,
            "Action dispatched"
        );
        Ok(action)
    }
}
