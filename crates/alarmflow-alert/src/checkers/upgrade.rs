use alarmflow_common::action::AlertLogOp;
use alarmflow_common::alert::{Alert, AlertStatus, UpgradeNoticeState};
use alarmflow_common::strategy::ActionSignal;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;

use crate::checkers::CheckContext;
use crate::dispatch::ActionRequest;
use crate::Checker;

/// Escalates alerts nobody handled to the next configured user group.
pub struct UpgradeChecker;

#[async_trait]
impl Checker for UpgradeChecker {
    fn name(&self) -> &'static str {
        "upgrade"
    }

    fn is_enabled(&self, alert: &Alert) -> bool {
        alert.status == AlertStatus::Abnormal
    }

    async fn check(&self, alert: &mut Alert, ctx: &mut CheckContext<'_>) -> Result<()> {
        if alert.is_ack || alert.is_shielded {
            return Ok(());
        }
        let Some(strategy) = ctx.strategy(alert) else {
            return Ok(());
        };

        for config in &strategy.actions {
            let Some(upgrade) = config.upgrade.as_ref().filter(|u| u.is_enabled) else {
                continue;
            };
            let state = alert.extra_info.upgrade_notice.get(&config.id.to_string()).copied();
            let (since, group_index) = match state {
                Some(s) => (s.last_upgrade_time, s.group_index + 1),
                None => (alert.first_anomaly_time, 0),
            };
            let Some(group) = upgrade.user_groups.get(group_index) else {
                continue;
            };
            if ctx.now - since < Duration::seconds(upgrade.interval_secs as i64) {
                continue;
            }

            ctx.dispatcher
                .dispatch(
                    ActionRequest {
                        alert,
                        config,
                        signal: ActionSignal::Upgrade,
                        execute_times: 1,
                        receivers: Some(group.clone()),
                        noise: None,
                    },
                    ctx.now,
                )
                .await?;
            alert.extra_info.upgrade_notice.insert(
                config.id.to_string(),
                UpgradeNoticeState {
                    last_upgrade_time: ctx.now,
                    group_index,
                },
            );
            ctx.log(
                alert,
                AlertLogOp::Upgrade,
                format!("upgraded to group {group_index}: {}", group.join(",")),
            );
            tracing::info!(
                alert_id = %alert.id,
                action_config_id = config.id,
                group_index,
                "Alert upgraded"
            );
        }
        Ok(())
    }
}
