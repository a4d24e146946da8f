//! The ordered lifecycle chain and the registry it is built from.

pub mod ack;
pub mod action_handle;
pub mod close_status;
pub mod next_status;
pub mod recover_status;
pub mod shield_status;
pub mod upgrade;

use alarmflow_access::qos::QosFloodControl;
use alarmflow_common::action::{AlertLog, AlertLogOp};
use alarmflow_common::alert::Alert;
use alarmflow_common::strategy::Strategy;
use alarmflow_storage::DocumentStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::dispatch::ActionDispatcher;
use crate::shield::ShieldMatcher;
use crate::Checker;

/// Everything a checker may read or act through during one cycle.
pub struct CheckContext<'a> {
    pub now: DateTime<Utc>,
    pub strategies: &'a HashMap<i64, Strategy>,
    pub docs: &'a dyn DocumentStore,
    pub dispatcher: &'a ActionDispatcher,
    pub qos: &'a QosFloodControl,
    pub shields: &'a dyn ShieldMatcher,
    logs: Vec<AlertLog>,
}

impl<'a> CheckContext<'a> {
    pub fn new(
        now: DateTime<Utc>,
        strategies: &'a HashMap<i64, Strategy>,
        docs: &'a dyn DocumentStore,
        dispatcher: &'a ActionDispatcher,
        qos: &'a QosFloodControl,
        shields: &'a dyn ShieldMatcher,
    ) -> Self {
        Self {
            now,
            strategies,
            docs,
            dispatcher,
            qos,
            shields,
            logs: Vec::new(),
        }
    }

    pub fn strategy(&self, alert: &Alert) -> Option<&'a Strategy> {
        alert.strategy_id.and_then(|id| self.strategies.get(&id))
    }

    pub fn log(&mut self, alert: &Alert, op: AlertLogOp, description: impl Into<String>) {
        self.logs
            .push(AlertLog::new(vec![alert.id.clone()], op, description, self.now));
    }

    pub fn push_log(&mut self, log: AlertLog) {
        self.logs.push(log);
    }

    pub fn take_logs(&mut self) -> Vec<AlertLog> {
        std::mem::take(&mut self.logs)
    }
}

pub type CheckerFactory = fn() -> Box<dyn Checker>;

fn next_status() -> Box<dyn Checker> {
    Box::new(next_status::NextStatusChecker)
}

fn close_status() -> Box<dyn Checker> {
    Box::new(close_status::CloseStatusChecker)
}

fn recover_status() -> Box<dyn Checker> {
    Box::new(recover_status::RecoverStatusChecker)
}

fn shield_status() -> Box<dyn Checker> {
    Box::new(shield_status::ShieldStatusChecker)
}

fn ack() -> Box<dyn Checker> {
    Box::new(ack::AckChecker)
}

fn upgrade() -> Box<dyn Checker> {
    Box::new(upgrade::UpgradeChecker)
}

fn action_handle() -> Box<dyn Checker> {
    Box::new(action_handle::ActionHandleChecker)
}

/// Name -> constructor table, in execution order.
///
/// Status transitions come first so later checkers read the new status;
/// shield, ack and upgrade are settled before `action_handle` decides on a
/// cyclic notification.
pub struct CheckerRegistry {
    entries: Vec<(&'static str, CheckerFactory)>,
}

impl CheckerRegistry {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("next_status", next_status);
        registry.register("close_status", close_status);
        registry.register("recover_status", recover_status);
        registry.register("shield_status", shield_status);
        registry.register("ack", ack);
        registry.register("upgrade", upgrade);
        registry.register("action_handle", action_handle);
        registry
    }

    /// Appends a checker, or replaces the constructor of an existing name in
    /// place.
    pub fn register(&mut self, name: &'static str, factory: CheckerFactory) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = factory,
            None => self.entries.push((name, factory)),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(n, _)| *n).collect()
    }

    pub fn build(&self) -> Vec<Box<dyn Checker>> {
        self.entries.iter().map(|(_, factory)| factory()).collect()
    }
}

impl Default for CheckerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
