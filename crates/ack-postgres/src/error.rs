use ack_ledger::LedgerError;
use ack_worker::WorkerError;

pub(crate) const DOC_SUBJECT_KEY: &str = "signature_records_doc_subject_key";
pub(crate) const DOC_PREV_KEY: &str = "signature_records_doc_prev_key";

/// Whether the database itself is out of reach, as opposed to a query
/// failing.
pub fn is_unavailable(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed
    )
}

/// Name of the unique constraint `e` violated, if that is what happened.
pub(crate) fn violated_constraint(e: &sqlx::Error) -> Option<&str> {
    e.as_database_error()
        .filter(|db| db.is_unique_violation())
        .and_then(|db| db.constraint())
}

pub(crate) fn worker_error(e: sqlx::Error) -> WorkerError {
    if is_unavailable(&e) {
        WorkerError::StorageUnavailable(e.to_string())
    } else {
        WorkerError::Storage(e.to_string())
    }
}

pub(crate) fn ledger_error(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}
