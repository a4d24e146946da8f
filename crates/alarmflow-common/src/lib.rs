//! Shared data model for the alarm pipeline: records, items, alerts,
//! strategy snapshots, action rows, audit logs and queue task payloads.

pub mod action;
pub mod alert;
pub mod hash;
pub mod id;
pub mod strategy;
pub mod task;
pub mod types;
