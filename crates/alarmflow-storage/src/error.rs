/// Errors raised by the external collaborators (key-value store, document
/// store, config store, task queue).
///
/// Lock contention is deliberately not represented here: failing to take an
/// advisory lock is an expected outcome and is reported as `false`.
///
/// # Examples
///
/// ```rust
/// use alarmflow_storage::error::StoreError;
///
/// let err = StoreError::NotFound {
///     entity: "action",
///     id: "42".to_string(),
/// };
/// assert!(err.to_string().contains("action"));
/// assert!(!err.is_unavailable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached. Counters and caches fail open on
    /// this; alert persistence treats it as "not yet decided".
    #[error("Store: backend unavailable: {0}")]
    Unavailable(String),

    /// A transient backend failure that a bounded retry may clear.
    #[error("Store: backend error: {0}")]
    Backend(String),

    /// A required document was not found.
    #[error("Store: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// JSON serialization or deserialization of a cached value failed.
    #[error("Store: JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Convenience `Result` alias for collaborator calls.
pub type Result<T> = std::result::Result<T, StoreError>;
