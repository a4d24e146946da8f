//! Alert lifecycle: building alerts from surviving records and driving
//! every live alert through an ordered checker chain each cycle.
//!
//! [`pipeline::AlarmPipeline`] takes raw records through priority
//! inhibition, QoS and the [`builder::AlertBuilder`].
//! [`manager::AlertLifecycleManager`] locks a batch of alerts, runs the
//! registered [`Checker`]s over each of them and persists the result.
//! [`worker::TaskWorker`] executes the tasks the rest of the core schedules.

pub mod builder;
pub mod checkers;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod pending;
pub mod pipeline;
pub mod session;
pub mod shield;
pub mod snapshot;
pub mod worker;


use alarmflow_access::qos::QosSettings;
use alarmflow_common::alert::Alert;
use alarmflow_converge::{ConvergeSettings, NoiseSettings};
use alarmflow_storage::{DocumentStore, KvStore, StrategyStore, TaskQueue};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use checkers::{CheckContext, CheckerRegistry};
pub use manager::{AlertLifecycleManager, CycleReport, LifecycleSettings};
pub use session::WorkerSession;

/// One step of the lifecycle chain.
///
/// Checkers run in registration order on every locked alert. A failing
/// check is logged and counted by the manager; the remaining checkers and
/// alerts still run.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Registry name (e.g. `"action_handle"`).
    fn name(&self) -> &'static str;

    /// Whether this checker applies to `alert`. Defaults to live
    /// (abnormal or recovering) alerts.
    fn is_enabled(&self, alert: &Alert) -> bool {
        alert.status.is_abnormal()
    }

    /// Mutates `alert` and may dispatch actions through `ctx`.
    ///
    /// # Errors
    ///
    /// Any error is contained to this alert and checker.
    async fn check(&self, alert: &mut Alert, ctx: &mut CheckContext<'_>) -> Result<()>;
}

/// The external collaborators every component is built from.
#[derive(Clone)]
pub struct Backends {
    pub kv: Arc<dyn KvStore>,
    pub docs: Arc<dyn DocumentStore>,
    pub strategies: Arc<dyn StrategyStore>,
    pub queue: Arc<dyn TaskQueue>,
}

/// Settings of every core component, composed into the worker config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreSettings {
    #[serde(default)]
    pub lifecycle: LifecycleSettings,
    #[serde(default)]
    pub qos: QosSettings,
    #[serde(default)]
    pub converge: ConvergeSettings,
    #[serde(default)]
    pub noise: NoiseSettings,
}
