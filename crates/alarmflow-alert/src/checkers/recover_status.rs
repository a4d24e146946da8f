use alarmflow_common::alert::{Alert, AlertStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;

use crate::checkers::CheckContext;
use crate::Checker;

/// Moves quiet alerts to recovering, and recovering alerts with a fresh
/// anomaly back to abnormal.
pub struct RecoverStatusChecker;

#[async_trait]
impl Checker for RecoverStatusChecker {
    fn name(&self) -> &'static str {
        "recover_status"
    }

    async fn check(&self, alert: &mut Alert, ctx: &mut CheckContext<'_>) -> Result<()> {
        let Some(strategy) = ctx.strategy(alert) else {
            return Ok(());
        };

        match alert.status {
            AlertStatus::Abnormal => {
                let quiet_for = ctx.now - alert.latest_time;
                if quiet_for < Duration::seconds(strategy.recovery_window_secs as i64) {
                    return Ok(());
                }
                alert.status = AlertStatus::Recovering;
                alert.recovering_since = Some(ctx.now);
                alert.next_status = Some(AlertStatus::Recovered);
                alert.next_status_time =
                    Some(ctx.now + Duration::seconds(strategy.recovery_grace_secs as i64));
                tracing::info!(
                    alert_id = %alert.id,
                    quiet_secs = quiet_for.num_seconds(),
                    "Alert recovering"
                );
            }
            AlertStatus::Recovering => {
                if alert
                    .recovering_since
                    .is_some_and(|since| alert.latest_time > since)
                {
                    alert.status = AlertStatus::Abnormal;
                    alert.recovering_since = None;
                    alert.next_status = None;
                    alert.next_status_time = None;
                    tracing::info!(alert_id = %alert.id, "Alert abnormal again");
                }
            }
            AlertStatus::Recovered | AlertStatus::Closed => {}
        }
        Ok(())
    }
}
