//! Interfaces to the collaborators the alarm core runs against, with
//! in-memory implementations.
//!
//! The core only ever talks to these traits: [`kv::KvStore`] for shared
//! counters, sets and locks, [`document::DocumentStore`] for persisted
//! alerts/actions/logs, [`strategy::StrategyStore`] for configuration and
//! [`queue::TaskQueue`] for deferred work.

pub mod document;
pub mod error;
pub mod kv;
pub mod lock;
pub mod queue;
pub mod strategy;


pub use document::{BulkReport, DocumentStore, MemoryDocumentStore, UpsertMode};
pub use error::StoreError;
pub use kv::{KvStore, MemoryKvStore};
pub use lock::{MultiLock, ServiceLock};
pub use queue::{MemoryTaskQueue, ScheduledTask, TaskQueue};
pub use strategy::{MemoryStrategyStore, StrategyStore};
