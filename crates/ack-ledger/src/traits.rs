use async_trait::async_trait;

use crate::error::LedgerError;
use crate::records::SignatureRecord;

/// Write boundary for the acknowledgment ledger.
///
/// Implementations must:
/// - reject a second record for the same `(doc_id, user_subject)` with
///   [`LedgerError::DuplicateAcknowledgment`] carrying the stored record;
/// - re-check, atomically with the insert, that the document's current tail
///   is still the record signed by `expected_tail` (`None` for an empty
///   chain) and fail with [`LedgerError::TailConflict`] otherwise;
/// - never update or delete a stored record.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn append(
        &self,
        record: &SignatureRecord,
        expected_tail: Option<&str>,
    ) -> Result<(), LedgerError>;
}

/// Read boundary for ledger queries and verification.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// The record of `user_subject` for `doc_id`, if any.
    async fn find(
        &self,
        doc_id: &str,
        user_subject: &str,
    ) -> Result<Option<SignatureRecord>, LedgerError>;

    /// Most recent record of the document's chain.
    async fn tail(&self, doc_id: &str) -> Result<Option<SignatureRecord>, LedgerError>;

    /// All records of the document in signing order.
    async fn read_chain(&self, doc_id: &str) -> Result<Vec<SignatureRecord>, LedgerError>;

    /// Every document id with at least one record.
    async fn documents(&self) -> Result<Vec<String>, LedgerError>;

    async fn record_count(&self, doc_id: &str) -> Result<u64, LedgerError>;
}
