use ack_crypto::{Digest, Signature};
use ack_ledger::{LedgerError, LedgerReader, LedgerWriter, Nonce, SignatureRecord};
use ack_types::TenantId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::error::{ledger_error, violated_constraint, DOC_PREV_KEY, DOC_SUBJECT_KEY};

const RECORD_COLUMNS: &str = "tenant_id, doc_id, user_subject, user_email, signed_at, created_at, \
     payload_hash, signature, nonce, prev_hash, referer";

#[derive(sqlx::FromRow)]
pub(crate) struct RecordRow {
    tenant_id: String,
    doc_id: String,
    user_subject: String,
    user_email: String,
    signed_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    payload_hash: Vec<u8>,
    signature: Vec<u8>,
    nonce: Vec<u8>,
    prev_hash: Vec<u8>,
    referer: Option<String>,
}

impl TryFrom<RecordRow> for SignatureRecord {
    type Error = LedgerError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, e: String| {
            LedgerError::Serialization(format!(
                "{} of {}/{}: {e}",
                what, row.doc_id, row.user_subject
            ))
        };
        Ok(SignatureRecord {
            tenant_id: TenantId::new(row.tenant_id.clone())
                .map_err(|e| corrupt("tenant_id", e.to_string()))?,
            payload_hash: Digest::from_slice(&row.payload_hash)
                .map_err(|e| corrupt("payload_hash", e.to_string()))?,
            signature: Signature::from_slice(&row.signature)
                .map_err(|e| corrupt("signature", e.to_string()))?,
            nonce: Nonce::from_slice(&row.nonce).map_err(|e| corrupt("nonce", e.to_string()))?,
            prev_hash: Digest::from_slice(&row.prev_hash)
                .map_err(|e| corrupt("prev_hash", e.to_string()))?,
            doc_id: row.doc_id,
            user_subject: row.user_subject,
            user_email: row.user_email,
            signed_at: row.signed_at,
            created_at: row.created_at,
            referer: row.referer,
        })
    }
}

/// PostgreSQL acknowledgment ledger.
///
/// Signing order is the insertion order (`seq`). Appends take a
/// transaction-scoped advisory lock on the document, so the tail check and
/// the insert see the same chain; `UNIQUE (doc_id, prev_hash)` backs it up.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerWriter for PgLedger {
    async fn append(
        &self,
        record: &SignatureRecord,
        expected_tail: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await.map_err(ledger_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&record.doc_id)
            .execute(&mut *tx)
            .await
            .map_err(ledger_error)?;

        let existing: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM signature_records WHERE doc_id = $1 AND user_subject = $2"
        ))
        .bind(&record.doc_id)
        .bind(&record.user_subject)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ledger_error)?;
        if let Some(row) = existing {
            return Err(LedgerError::DuplicateAcknowledgment(Box::new(row.try_into()?)));
        }

        let tail: Option<String> = sqlx::query_scalar(
            "SELECT user_subject FROM signature_records WHERE doc_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(&record.doc_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ledger_error)?;
        if tail.as_deref() != expected_tail {
            debug!(doc_id = %record.doc_id, "tail moved before append");
            return Err(LedgerError::TailConflict {
                doc_id: record.doc_id.clone(),
            });
        }

        let inserted = sqlx::query(&format!(
            "INSERT INTO signature_records ({RECORD_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(record.tenant_id.as_str())
        .bind(&record.doc_id)
        .bind(&record.user_subject)
        .bind(&record.user_email)
        .bind(record.signed_at)
        .bind(record.created_at)
        .bind(record.payload_hash.as_bytes().as_slice())
        .bind(record.signature.to_bytes().as_slice())
        .bind(record.nonce.as_bytes().as_slice())
        .bind(record.prev_hash.as_bytes().as_slice())
        .bind(record.referer.as_deref())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // A writer that bypassed the advisory lock got there first; the
            // retry in the signing service sorts out which case this was.
            Err(e) if matches!(violated_constraint(&e), Some(DOC_SUBJECT_KEY | DOC_PREV_KEY)) => {
                return Err(LedgerError::TailConflict {
                    doc_id: record.doc_id.clone(),
                })
            }
            Err(e) => return Err(ledger_error(e)),
        }

        tx.commit().await.map_err(ledger_error)
    }
}

#[async_trait]
impl LedgerReader for PgLedger {
    async fn find(
        &self,
        doc_id: &str,
        user_subject: &str,
    ) -> Result<Option<SignatureRecord>, LedgerError> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM signature_records WHERE doc_id = $1 AND user_subject = $2"
        ))
        .bind(doc_id)
        .bind(user_subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(ledger_error)?;
        row.map(SignatureRecord::try_from).transpose()
    }

    async fn tail(&self, doc_id: &str) -> Result<Option<SignatureRecord>, LedgerError> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM signature_records WHERE doc_id = $1
             ORDER BY seq DESC LIMIT 1"
        ))
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ledger_error)?;
        row.map(SignatureRecord::try_from).transpose()
    }

    async fn read_chain(&self, doc_id: &str) -> Result<Vec<SignatureRecord>, LedgerError> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM signature_records WHERE doc_id = $1 ORDER BY seq"
        ))
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ledger_error)?;
        rows.into_iter().map(SignatureRecord::try_from).collect()
    }

    async fn documents(&self) -> Result<Vec<String>, LedgerError> {
        sqlx::query_scalar("SELECT DISTINCT doc_id FROM signature_records ORDER BY doc_id")
            .fetch_all(&self.pool)
            .await
            .map_err(ledger_error)
    }

    async fn record_count(&self, doc_id: &str) -> Result<u64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM signature_records WHERE doc_id = $1")
            .bind(doc_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ledger_error)?;
        Ok(count.max(0) as u64)
    }
}
