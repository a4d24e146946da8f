//! Record-level access gates applied before alerts are built.
//!
//! [`priority::PriorityInhibitor`] lets only the highest-priority item of a
//! priority group propagate on a given set of dimensions.
//! [`qos::QosFloodControl`] caps the number of signals per exact alarm
//! fingerprint and fails open when its counter store is unavailable.

pub mod priority;
pub mod qos;
