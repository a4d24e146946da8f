use alarmflow_converge::ConvergeError;
use alarmflow_storage::StoreError;

/// Errors raised by the alert lifecycle.
///
/// Lock contention is not an error: contended alerts are deferred to the
/// next cycle and reported in the cycle counters.
///
/// # Examples
///
/// ```rust
/// use alarmflow_alert::error::LifecycleError;
///
/// let err = LifecycleError::ConfigMissing {
///     entity: "strategy",
///     id: "7".to_string(),
/// };
/// assert!(err.to_string().contains("strategy"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A strategy or action config referenced by an alert is gone. Only the
    /// affected alert or action is skipped.
    #[error("Lifecycle: {entity} {id} not configured")]
    ConfigMissing { entity: &'static str, id: String },

    #[error("Lifecycle: {0}")]
    Store(#[from] StoreError),

    #[error("Lifecycle: {0}")]
    Converge(#[from] ConvergeError),
}

/// Convenience `Result` alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;
