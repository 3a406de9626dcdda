use crate::records::SignatureRecord;

/// Errors produced by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The signer already acknowledged this document. The existing record is
    /// authoritative; callers treat this as "already signed".
    #[error("{} already acknowledged by {}", .0.doc_id, .0.user_subject)]
    DuplicateAcknowledgment(Box<SignatureRecord>),

    /// The chain tail moved between reading it and appending. Retryable.
    #[error("chain tail of document {doc_id} moved during append")]
    TailConflict { doc_id: String },

    #[error("signing key unavailable: {0}")]
    SigningKeyUnavailable(String),

    #[error("document {doc_id} reached its limit of {limit} signatures")]
    QuotaExceeded { doc_id: String, limit: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Whether repeating the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TailConflict { .. } | Self::Storage(_))
    }
}
