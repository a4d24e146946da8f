use alarmflow_storage::StoreError;

/// Errors raised while converging or noise-reducing actions.
///
/// # Examples
///
/// ```rust
/// use alarmflow_converge::error::ConvergeError;
///
/// let err = ConvergeError::ActionMissing("1024".to_string());
/// assert!(err.to_string().contains("1024"));
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConvergeError {
    /// The action row referenced by a task no longer exists.
    #[error("Converge: action {0} not found")]
    ActionMissing(String),

    /// A collaborator call failed.
    #[error("Converge: {0}")]
    Store(#[from] StoreError),
}

impl ConvergeError {
    /// Store failures are worth a bounded retry; a missing action is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConvergeError::Store(_))
    }
}

/// Convenience `Result` alias for convergence operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;
