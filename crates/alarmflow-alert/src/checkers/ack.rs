use alarmflow_common::action::AlertLogOp;
use alarmflow_common::alert::Alert;
use anyhow::Result;
use async_trait::async_trait;

use crate::checkers::CheckContext;
use crate::Checker;

/// Clears expired acknowledgements so cyclic notices resume.
pub struct AckChecker;

#[async_trait]
impl Checker for AckChecker {
    fn name(&self) -> &'static str {
        "ack"
    }

    async fn check(&self, alert: &mut Alert, ctx: &mut CheckContext<'_>) -> Result<()> {
        if !alert.is_ack || !alert.ack_until.is_some_and(|until| until <= ctx.now) {
            return Ok(());
        }
        let operator = alert.ack_operator.take().unwrap_or_default();
        alert.is_ack = false;
        alert.ack_until = None;
        ctx.log(
            alert,
            AlertLogOp::AckExpired,
            format!("acknowledgement by {operator} expired"),
        );
        tracing::info!(alert_id = %alert.id, operator = %operator, "Acknowledgement expired");
        Ok(())
    }
}
