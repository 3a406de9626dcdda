use std::fmt;

use ack_crypto::{ChainDigest, ChainLink, ContentHasher, Digest, HasherError, Signature};
use ack_types::TenantId;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LedgerError;

/// Random value making every acknowledgment payload unique.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; 16]);

impl Nonce {
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LedgerError> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| {
            LedgerError::Serialization(format!("nonce must be 16 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.to_hex())
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Self::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Who is acknowledging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerIdentity {
    /// Stable subject from the identity provider (or the email for magic links).
    pub subject: String,
    pub email: String,
}

impl SignerIdentity {
    pub fn new(subject: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            email: email.into(),
        }
    }
}

/// Input to [`crate::SigningService::sign`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub tenant_id: TenantId,
    pub doc_id: String,
    pub signer: SignerIdentity,
    /// Optional provenance (page or integration the acknowledgment came from).
    pub referer: Option<String>,
}

impl SignRequest {
    pub fn new(tenant_id: TenantId, doc_id: impl Into<String>, signer: SignerIdentity) -> Self {
        Self {
            tenant_id,
            doc_id: doc_id.into(),
            signer,
            referer: None,
        }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), LedgerError> {
        if self.doc_id.trim().is_empty() {
            return Err(LedgerError::InvalidRequest("doc_id must not be empty".into()));
        }
        if self.signer.subject.trim().is_empty() {
            return Err(LedgerError::InvalidRequest(
                "signer subject must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// One acknowledgment: a specific user read a specific document.
///
/// Records are written once by the signing service and never updated.
/// `prev_hash` links each record to its predecessor in the same document's
/// chain; the first record links to [`genesis_hash`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub tenant_id: TenantId,
    pub doc_id: String,
    pub user_subject: String,
    pub user_email: String,
    pub signed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub payload_hash: Digest,
    pub signature: Signature,
    pub nonce: Nonce,
    pub prev_hash: Digest,
    pub referer: Option<String>,
}

/// The bytes covered by `payload_hash` (and therefore by the signature).
#[derive(Serialize)]
struct CanonicalPayload<'a> {
    doc_id: &'a str,
    user_subject: &'a str,
    user_email: &'a str,
    signed_at_us: i64,
    nonce: &'a Nonce,
}

/// The bytes covered by the record hash the next record links to.
#[derive(Serialize)]
struct CanonicalRecord<'a> {
    tenant_id: &'a str,
    doc_id: &'a str,
    user_subject: &'a str,
    user_email: &'a str,
    signed_at_us: i64,
    created_at_us: i64,
    payload_hash: &'a Digest,
    signature: &'a Signature,
    nonce: &'a Nonce,
    prev_hash: &'a Digest,
    referer: Option<&'a str>,
}

/// Digest of the acknowledgment payload `(doc, signer, signed_at, nonce)`.
pub fn payload_hash(
    algorithm: ChainDigest,
    doc_id: &str,
    signer: &SignerIdentity,
    signed_at: DateTime<Utc>,
    nonce: &Nonce,
) -> Result<Digest, LedgerError> {
    ContentHasher::PAYLOAD
        .hash_json(
            algorithm,
            &CanonicalPayload {
                doc_id,
                user_subject: &signer.subject,
                user_email: &signer.email,
                signed_at_us: signed_at.timestamp_micros(),
                nonce,
            },
        )
        .map_err(|e| LedgerError::Serialization(e.to_string()))
}

/// `prev_hash` of the first record of a document's chain.
pub fn genesis_hash(algorithm: ChainDigest, doc_id: &str) -> Digest {
    ContentHasher::GENESIS.hash(algorithm, doc_id.as_bytes())
}

impl SignatureRecord {
    /// Recompute the payload digest from the stored fields.
    pub fn compute_payload_hash(&self, algorithm: ChainDigest) -> Result<Digest, LedgerError> {
        payload_hash(
            algorithm,
            &self.doc_id,
            &SignerIdentity::new(self.user_subject.clone(), self.user_email.clone()),
            self.signed_at,
            &self.nonce,
        )
    }

    /// Digest of the whole record; the next record's `prev_hash`.
    pub fn record_hash(&self, algorithm: ChainDigest) -> Result<Digest, HasherError> {
        ContentHasher::RECORD.hash_json(
            algorithm,
            &CanonicalRecord {
                tenant_id: self.tenant_id.as_str(),
                doc_id: &self.doc_id,
                user_subject: &self.user_subject,
                user_email: &self.user_email,
                signed_at_us: self.signed_at.timestamp_micros(),
                created_at_us: self.created_at.timestamp_micros(),
                payload_hash: &self.payload_hash,
                signature: &self.signature,
                nonce: &self.nonce,
                prev_hash: &self.prev_hash,
                referer: self.referer.as_deref(),
            },
        )
    }

    /// Stable identifier of the event emitted for this record.
    pub fn event_id(&self) -> String {
        format!("evt_{}", self.payload_hash.to_hex())
    }

    pub(crate) fn as_link(&self, algorithm: ChainDigest) -> RecordLink<'_> {
        RecordLink {
            record: self,
            algorithm,
        }
    }
}

/// A record viewed as a hash chain link under a given digest.
pub(crate) struct RecordLink<'a> {
    record: &'a SignatureRecord,
    algorithm: ChainDigest,
}

impl ChainLink for RecordLink<'_> {
    fn prev_hash(&self) -> Digest {
        self.record.prev_hash
    }

    fn link_hash(&self) -> Result<Digest, HasherError> {
        self.record.record_hash(self.algorithm)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use ack_crypto::SigningKey;

    use super::*;

    /// A correctly signed record, for tests that build chains by hand.
    pub(crate) fn record(
        key: &SigningKey,
        doc_id: &str,
        subject: &str,
        prev_hash: Digest,
        at: DateTime<Utc>,
    ) -> SignatureRecord {
        let signer = SignerIdentity::new(subject, format!("{subject}@co"));
        let nonce = Nonce::random();
        let payload_hash =
            payload_hash(ChainDigest::Sha256, doc_id, &signer, at, &nonce).unwrap();
        SignatureRecord {
            tenant_id: TenantId::new("acme").unwrap(),
            doc_id: doc_id.into(),
            user_subject: signer.subject,
            user_email: signer.email,
            signed_at: at,
            created_at: at,
            payload_hash,
            signature: key.sign(payload_hash.as_bytes()),
            nonce,
            prev_hash,
            referer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use ack_crypto::SigningKey;
    use ack_types::truncate_micros;

    use super::*;

    #[test]
    fn payload_hash_covers_every_field() {
        let at = truncate_micros(Utc::now());
        let signer = SignerIdentity::new("alice", "alice@co");
        let nonce = Nonce::from_bytes([1; 16]);
        let base = payload_hash(ChainDigest::Sha256, "doc", &signer, at, &nonce).unwrap();

        let other_doc = payload_hash(ChainDigest::Sha256, "doc2", &signer, at, &nonce).unwrap();
        let other_signer = payload_hash(
            ChainDigest::Sha256,
            "doc",
            &SignerIdentity::new("bob", "alice@co"),
            at,
            &nonce,
        )
        .unwrap();
        let later = payload_hash(
            ChainDigest::Sha256,
            "doc",
            &signer,
            at + chrono::Duration::microseconds(1),
            &nonce,
        )
        .unwrap();
        let other_nonce = payload_hash(
            ChainDigest::Sha256,
            "doc",
            &signer,
            at,
            &Nonce::from_bytes([2; 16]),
        )
        .unwrap();

        for other in [other_doc, other_signer, later, other_nonce] {
            assert_ne!(base, other);
        }
    }

    #[test]
    fn record_hash_changes_with_signature() {
        let key = SigningKey::generate();
        let at = truncate_micros(Utc::now());
        let genesis = genesis_hash(ChainDigest::Sha256, "doc");
        let record = fixtures::record(&key, "doc", "alice", genesis, at);

        let mut tampered = record.clone();
        tampered.signature = key.sign(b"something else");
        assert_ne!(
            record.record_hash(ChainDigest::Sha256).unwrap(),
            tampered.record_hash(ChainDigest::Sha256).unwrap()
        );
    }

    #[test]
    fn genesis_is_bound_to_document() {
        assert_ne!(
            genesis_hash(ChainDigest::Sha256, "policy-2025"),
            genesis_hash(ChainDigest::Sha256, "policy-2026")
        );
    }

    #[test]
    fn event_id_is_derived_from_payload_hash() {
        let key = SigningKey::generate();
        let at = truncate_micros(Utc::now());
        let record = fixtures::record(&key, "doc", "alice", genesis_hash(ChainDigest::Sha256, "doc"), at);
        assert_eq!(record.event_id(), format!("evt_{}", record.payload_hash.to_hex()));
        assert_eq!(record.event_id(), record.clone().event_id());
    }

    #[test]
    fn request_validation() {
        let tenant = TenantId::new("acme").unwrap();
        let ok = SignRequest::new(tenant.clone(), "doc", SignerIdentity::new("alice", "a@co"));
        assert!(ok.validate().is_ok());

        let no_doc = SignRequest::new(tenant.clone(), " ", SignerIdentity::new("alice", "a@co"));
        assert!(matches!(no_doc.validate(), Err(LedgerError::InvalidRequest(_))));

        let no_subject = SignRequest::new(tenant, "doc", SignerIdentity::new("", "a@co"));
        assert!(matches!(no_subject.validate(), Err(LedgerError::InvalidRequest(_))));
    }

    #[test]
    fn record_serde_roundtrip() {
        let key = SigningKey::generate();
        let at = truncate_micros(Utc::now());
        let record = fixtures::record(&key, "doc", "alice", genesis_hash(ChainDigest::Sha256, "doc"), at)
            .clone();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: SignatureRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
