use alarmflow_common::action::AlertLogOp;
use alarmflow_common::alert::{Alert, AlertStatus};
use anyhow::Result;
use async_trait::async_trait;

use crate::checkers::CheckContext;
use crate::Checker;

/// Closes alerts whose strategy was deleted or disabled.
pub struct CloseStatusChecker;

#[async_trait]
impl Checker for CloseStatusChecker {
    fn name(&self) -> &'static str {
        "close_status"
    }

    async fn check(&self, alert: &mut Alert, ctx: &mut CheckContext<'_>) -> Result<()> {
        let Some(strategy_id) = alert.strategy_id else {
            return Ok(());
        };
        let reason = match ctx.strategies.get(&strategy_id) {
            None => "strategy deleted",
            Some(s) if !s.is_enabled => "strategy disabled",
            Some(_) => return Ok(()),
        };

        alert.status = AlertStatus::Closed;
        alert.end_time = Some(ctx.now);
        alert.next_status = None;
        alert.next_status_time = None;
        ctx.log(alert, AlertLogOp::Close, format!("alert {} closed: {reason}", alert.id));
        tracing::info!(alert_id = %alert.id, strategy_id, reason, "Alert closed");
        Ok(())
    }
}
