use alarmflow_common::alert::{Alert, AlertStatus, CycleHandleRecord};
use alarmflow_common::strategy::{ActionConfig, ActionSignal, IntervalNotifyMode};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::checkers::CheckContext;
use crate::dispatch::ActionRequest;
use crate::Checker;

/// Repeat interval after `execute_times` notifications.
///
/// Increasing mode doubles the configured interval after every notification:
/// 60s, 120s, 240s, ...
pub fn notify_interval(config: &ActionConfig, execute_times: u32) -> u64 {
    let base = config.notify_interval_secs;
    match config.interval_notify_mode {
        IntervalNotifyMode::Standard => base,
        IntervalNotifyMode::Increasing => {
            let shift = execute_times.saturating_sub(1).min(32);
            base.saturating_mul(1u64 << shift)
        }
    }
}

/// Whether another notification may go out on top of `record`.
///
/// Requires a positive interval, the interval to have elapsed since the last
/// notification, and an anomaly strictly newer than the one last notified.
pub fn cycle_due(
    config: &ActionConfig,
    record: &CycleHandleRecord,
    latest_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    let interval = notify_interval(config, record.execute_times);
    if interval == 0 {
        return false;
    }
    if now < record.last_time + Duration::seconds(interval as i64) {
        return false;
    }
    latest_time > record.latest_anomaly_time
}

/// Cycle record of `config` on `alert`, falling back to the latest action
/// already sent for it.
pub async fn current_record(
    alert: &Alert,
    config: &ActionConfig,
    ctx: &CheckContext<'_>,
) -> Result<Option<CycleHandleRecord>> {
    if let Some(record) = alert.cycle_record(config.id) {
        return Ok(Some(record));
    }
    Ok(ctx
        .docs
        .latest_action(&alert.id, config.id)
        .await?
        .map(|action| CycleHandleRecord {
            last_time: action.create_time,
            is_shielded: false,
            latest_anomaly_time: action.latest_anomaly_time,
            execute_times: action.execute_times,
        }))
}

/// Cyclic re-notification of abnormal and no-data alerts.
pub struct ActionHandleChecker;

#[async_trait]
impl Checker for ActionHandleChecker {
    fn name(&self) -> &'static str {
        "action_handle"
    }

    fn is_enabled(&self, alert: &Alert) -> bool {
        alert.status == AlertStatus::Abnormal
    }

    async fn check(&self, alert: &mut Alert, ctx: &mut CheckContext<'_>) -> Result<()> {
        if alert.is_shielded || alert.is_ack {
            tracing::debug!(alert_id = %alert.id, "Cyclic notice skipped for shielded or acked alert");
            return Ok(());
        }
        let Some(strategy) = ctx.strategy(alert) else {
            return Ok(());
        };
        let signal = if alert.is_no_data {
            ActionSignal::NoData
        } else {
            ActionSignal::Abnormal
        };

        for config in strategy.actions.iter().filter(|c| c.handles(signal)) {
            let Some(record) = current_record(alert, config, ctx).await? else {
                continue;
            };
            if !cycle_due(config, &record, alert.latest_time, ctx.now) {
                continue;
            }

            let execute_times = record.execute_times + 1;
            ctx.dispatcher
                .dispatch(
                    ActionRequest {
                        alert,
                        config,
                        signal,
                        execute_times,
                        receivers: None,
                        noise: strategy.noise_reduce(),
                    },
                    ctx.now,
                )
                .await?;
            alert.set_cycle_record(
                config.id,
                CycleHandleRecord {
                    last_time: ctx.now,
                    is_shielded: alert.is_shielded,
                    latest_anomaly_time: alert.latest_time,
                    execute_times,
                },
            );
            tracing::info!(
                alert_id = %alert.id,
                action_config_id = config.id,
                execute_times,
                "Cyclic notice sent"
            );
        }
        Ok(())
    }
}
