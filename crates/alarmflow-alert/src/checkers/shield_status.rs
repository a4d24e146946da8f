use alarmflow_access::qos::{fingerprint, QosVerdict};
use alarmflow_common::action::{AlertLog, AlertLogOp};
use alarmflow_common::alert::{Alert, AlertStatus, CycleHandleRecord};
use alarmflow_common::strategy::ActionSignal;
use anyhow::Result;
use async_trait::async_trait;

use crate::checkers::action_handle::{current_record, cycle_due};
use crate::checkers::CheckContext;
use crate::dispatch::ActionRequest;
use crate::Checker;

/// Refreshes the shield state and, when a shield ends on an abnormal
/// alert, sends an unshield notice through the QoS gate.
pub struct ShieldStatusChecker;

#[async_trait]
impl Checker for ShieldStatusChecker {
    fn name(&self) -> &'static str {
        "shield_status"
    }

    async fn check(&self, alert: &mut Alert, ctx: &mut CheckContext<'_>) -> Result<()> {
        let shield_ids = ctx.shields.match_alert(alert, ctx.now);
        let was_shielded = alert.is_shielded;
        alert.is_shielded = !shield_ids.is_empty();
        alert.shield_ids = shield_ids;

        if !was_shielded || alert.is_shielded {
            return Ok(());
        }
        ctx.log(alert, AlertLogOp::Unshield, format!("alert {} unshielded", alert.id));
        tracing::info!(alert_id = %alert.id, "Shield ended");

        if alert.status == AlertStatus::Recovering {
            return Ok(());
        }
        let Some(strategy) = ctx.strategy(alert) else {
            return Ok(());
        };

        for config in strategy.actions.iter().filter(|c| c.handles(ActionSignal::Abnormal)) {
            let record = current_record(alert, config, ctx).await?;
            if let Some(record) = &record {
                if !cycle_due(config, record, alert.latest_time, ctx.now) {
                    continue;
                }
            }

            let fp = fingerprint(
                alert.biz_id,
                alert.strategy_id.unwrap_or_default(),
                alert.item_id.unwrap_or_default(),
                &alert.target_ip,
                alert.severity,
            );
            if let QosVerdict::Dropped { count } = ctx.qos.admit(&fp).await {
                ctx.push_log(
                    AlertLog::new(
                        vec![alert.id.clone()],
                        AlertLogOp::QosDrop,
                        format!("unshield notice of action config {} dropped by qos", config.id),
                        ctx.now,
                    )
                    .with_count(count.max(0) as u64),
                );
                tracing::warn!(alert_id = %alert.id, count, "Unshield notice dropped by QoS");
                continue;
            }

            let execute_times = record.map_or(0, |r| r.execute_times) + 1;
            ctx.dispatcher
                .dispatch(
                    ActionRequest {
                        alert,
                        config,
                        signal: ActionSignal::Unshielded,
                        execute_times,
                        receivers: None,
                        noise: None,
                    },
                    ctx.now,
                )
                .await?;
            alert.set_cycle_record(
                config.id,
                CycleHandleRecord {
                    last_time: ctx.now,
                    is_shielded: false,
                    latest_anomaly_time: alert.latest_time,
                    execute_times,
                },
            );
        }
        Ok(())
    }
}
