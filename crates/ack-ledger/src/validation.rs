use std::fmt;
use std::sync::Arc;

use ack_crypto::{ChainDigest, ChainError, HashChainVerifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument, Span};

use crate::error::LedgerError;
use crate::records::{genesis_hash, SignatureRecord};
use crate::traits::LedgerReader;

/// Why a record failed verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakReason {
    /// `prev_hash` does not match the predecessor (or the genesis value).
    PrevHashMismatch,
    /// The stored payload hash differs from the recomputed one.
    PayloadHashMismatch,
    /// The signature does not verify against the payload hash.
    InvalidSignature,
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PrevHashMismatch => "prev_hash does not match predecessor",
            Self::PayloadHashMismatch => "payload hash does not match record content",
            Self::InvalidSignature => "signature does not verify",
        };
        f.write_str(s)
    }
}

/// Outcome of verifying one document chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainStatus {
    Ok,
    Broken {
        index: usize,
        user_subject: String,
        reason: BreakReason,
    },
}

impl ChainStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Ok,
    Broken,
}

/// Chain audit result for operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub doc_id: String,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at_index: Option<usize>,
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<BreakReason>,
}

impl AuditReport {
    fn new(doc_id: &str, record_count: usize, status: &ChainStatus) -> Self {
        match status {
            ChainStatus::Ok => Self {
                doc_id: doc_id.to_string(),
                status: AuditStatus::Ok,
                broken_at_index: None,
                record_count,
                reason: None,
            },
            ChainStatus::Broken { index, reason, .. } => Self {
                doc_id: doc_id.to_string(),
                status: AuditStatus::Broken,
                broken_at_index: Some(*index),
                record_count,
                reason: Some(*reason),
            },
        }
    }
}

/// Recomputes document chains and reports the first tampered record.
///
/// Never writes to the ledger.
pub struct ChainVerifier<R> {
    reader: Arc<R>,
    public_key: VerifyingKey,
    digest: ChainDigest,
    span: Span,
}

impl<R: LedgerReader> ChainVerifier<R> {
    pub fn new(reader: Arc<R>, public_key: VerifyingKey, digest: ChainDigest) -> Self {
        Self {
            reader,
            public_key,
            digest,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Verify the records of `doc_id` present when the scan starts.
    pub async fn verify(&self, doc_id: &str) -> Result<ChainStatus, LedgerError> {
        let records = self.reader.read_chain(doc_id).await?;
        verify_records(self.digest, &self.public_key, doc_id, &records)
    }

    pub async fn audit(&self, doc_id: &str) -> Result<AuditReport, LedgerError> {
        let span = tracing::info_span!(parent: &self.span, "audit", doc_id = %doc_id);
        async {
            let records = self.reader.read_chain(doc_id).await?;
            let status = verify_records(self.digest, &self.public_key, doc_id, &records)?;
            match &status {
                ChainStatus::Ok => info!(records = records.len(), "chain intact"),
                ChainStatus::Broken {
                    index,
                    user_subject,
                    reason,
                } => warn!(index, subject = %user_subject, %reason, "chain broken"),
            }
            Ok(AuditReport::new(doc_id, records.len(), &status))
        }
        .instrument(span)
        .await
    }

    /// Audit every document in the ledger.
    pub async fn audit_all(&self) -> Result<Vec<AuditReport>, LedgerError> {
        let mut reports = Vec::new();
        for doc_id in self.reader.documents().await? {
            reports.push(self.audit(&doc_id).await?);
        }
        Ok(reports)
    }
}

/// Verify a chain snapshot.
///
/// A record is broken if its `prev_hash` is not its predecessor's record
/// hash, its payload hash does not match its content, or its signature does
/// not verify. The earliest broken record is reported.
pub fn verify_records(
    digest: ChainDigest,
    public_key: &VerifyingKey,
    doc_id: &str,
    records: &[SignatureRecord],
) -> Result<ChainStatus, LedgerError> {
    let links: Vec<_> = records.iter().map(|r| r.as_link(digest)).collect();
    let first_broken_link = match HashChainVerifier::verify_chain(genesis_hash(digest, doc_id), &links) {
        Ok(()) => None,
        Err(ChainError::BrokenLink { index }) => Some(index),
        Err(ChainError::Hashing { index, reason }) => {
            return Err(LedgerError::Serialization(format!(
                "record {index} of {doc_id}: {reason}"
            )))
        }
    };

    for (index, record) in records.iter().enumerate() {
        if first_broken_link == Some(index) {
            return Ok(broken(record, index, BreakReason::PrevHashMismatch));
        }
        if record.compute_payload_hash(digest)? != record.payload_hash {
            return Ok(broken(record, index, BreakReason::PayloadHashMismatch));
        }
        if public_key
            .verify(record.payload_hash.as_bytes(), &record.signature)
            .is_err()
        {
            return Ok(broken(record, index, BreakReason::InvalidSignature));
        }
    }
    Ok(ChainStatus::Ok)
}

fn broken(record: &SignatureRecord, index: usize, reason: BreakReason) -> ChainStatus {
    ChainStatus::Broken {
        index,
        user_subject: record.user_subject.clone(),
        reason,
    }
}
