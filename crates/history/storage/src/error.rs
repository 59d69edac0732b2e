use crate::BackendError;
use thiserror::Error;

/// Errors that may occur while interacting with validator history storage.
///
/// Precondition failures are not errors: they surface as
/// [`WriteOutcome::PreconditionFailed`](crate::WriteOutcome) and are folded into
/// booleans by the repositories.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected the request with a non-retryable error.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend signalled that provisioned throughput was exceeded.
    #[error("request throttled by the backend")]
    Throttled,

    /// A conditional check failed where none was expected.
    #[error("unexpected precondition failure")]
    PreconditionFailed,

    /// A throttled request kept failing after the configured number of retries.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made, including the first one.
        attempts: usize,
    },

    /// Items were still reported as unprocessed after the redrive limit.
    #[error("{remaining} items left unprocessed after the redrive limit")]
    UnprocessedItems {
        /// Number of items that were never applied.
        remaining: usize,
    },

    /// A record could not be converted to or from its stored form.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// A record did not serialize to a key-value item.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl From<BackendError> for StorageError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Throttled => Self::Throttled,
            BackendError::ConditionFailed => Self::PreconditionFailed,
            BackendError::Other(msg) => Self::Backend(msg),
        }
    }
}
