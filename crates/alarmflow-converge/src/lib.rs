//! Convergence and noise reduction of notification actions.
//!
//! [`index::ConvergenceIndex`] answers which instances share a set of
//! dimension conditions inside a time window; [`processor::ConvergeProcessor`]
//! uses it to merge similar actions. [`noise::NoiseReducer`] batches abnormal
//! signals into deferred windows and suppresses windows whose abnormal share
//! stays under the configured percentage.

pub mod error;
pub mod index;
pub mod noise;
pub mod processor;

#[cfg(test)]
mod tests;

pub use error::ConvergeError;
pub use index::{ConvergeInstance, ConvergenceIndex, InstanceType};
pub use noise::{NoiseDecision, NoiseReducer, NoiseSettings};
pub use processor::{ConvergeOutcome, ConvergeProcessor, ConvergeSettings};
