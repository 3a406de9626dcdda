use ack_types::TypeError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// The backing store could not be reached. The only error
    /// [`crate::WorkerEngine::start`] returns.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("work item not found: {0}")]
    ItemNotFound(String),

    #[error("invalid item state: {0}")]
    InvalidState(String),

    #[error("tenant {tenant} did not finish within {secs}s")]
    TenantTimeout { tenant: String, secs: u64 },

    #[error("tenant {tenant} panicked: {message}")]
    TenantPanicked { tenant: String, message: String },
}

impl From<TypeError> for WorkerError {
    fn from(e: TypeError) -> Self {
        Self::InvalidState(e.to_string())
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
