use alarmflow_common::action::AlertLogOp;
use alarmflow_common::alert::{Alert, AlertStatus};
use alarmflow_common::strategy::ActionSignal;
use anyhow::Result;
use async_trait::async_trait;

use crate::checkers::CheckContext;
use crate::dispatch::ActionRequest;
use crate::Checker;

/// Applies a due `next_status`, unless a newer anomaly arrived while the
/// alert was recovering.
pub struct NextStatusChecker;

#[async_trait]
impl Checker for NextStatusChecker {
    fn name(&self) -> &'static str {
        "next_status"
    }

    async fn check(&self, alert: &mut Alert, ctx: &mut CheckContext<'_>) -> Result<()> {
        let (Some(next), Some(due)) = (alert.next_status, alert.next_status_time) else {
            return Ok(());
        };
        if ctx.now < due {
            return Ok(());
        }

        let anomaly_since_recovering = alert
            .recovering_since
            .is_some_and(|since| alert.latest_time > since);
        if alert.status == AlertStatus::Recovering && anomaly_since_recovering {
            tracing::info!(alert_id = %alert.id, "New anomaly during recovery, back to abnormal");
            alert.status = AlertStatus::Abnormal;
            alert.recovering_since = None;
            alert.next_status = None;
            alert.next_status_time = None;
            return Ok(());
        }

        let (signal, op) = match next {
            AlertStatus::Recovered => (ActionSignal::Recovered, AlertLogOp::Recover),
            AlertStatus::Closed => (ActionSignal::Closed, AlertLogOp::Close),
            AlertStatus::Abnormal | AlertStatus::Recovering => {
                alert.status = next;
                alert.next_status = None;
                alert.next_status_time = None;
                return Ok(());
            }
        };

        alert.status = next;
        alert.end_time = Some(ctx.now);
        alert.next_status = None;
        alert.next_status_time = None;
        alert.recovering_since = None;
        ctx.log(alert, op, format!("alert {} is now {next}", alert.id));
        tracing::info!(alert_id = %alert.id, status = %next, "Alert status applied");

        let Some(strategy) = ctx.strategy(alert) else {
            return Ok(());
        };
        for config in strategy.actions.iter().filter(|c| c.handles(signal)) {
            ctx.dispatcher
                .dispatch(
                    ActionRequest {
                        alert,
                        config,
                        signal,
                        execute_times: 1,
                        receivers: None,
                        noise: None,
                    },
                    ctx.now,
                )
                .await?;
        }
        Ok(())
    }
}
