//! Fetch error types.

/// Errors from fetching remote data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The remote says the key does not exist. Not retried until tomorrow.
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    /// Network or I/O failure; eligible for retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Anything else.
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl FetchError {
    /// Shorthand for a [`FetchError::NotFound`].
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        FetchError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Whether this error should still count as a completed fetch.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}
