use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use ack_crypto::{ChainDigest, SigningKey};
use ack_types::{truncate_micros, Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Instrument, Span};

use crate::error::LedgerError;
use crate::events::{DomainEvent, EventSink, NoopSink};
use crate::quota::SignatureQuota;
use crate::records::{genesis_hash, payload_hash, Nonce, SignRequest, SignatureRecord};
use crate::traits::{LedgerReader, LedgerWriter};

/// Source of the deployment's Ed25519 signing key.
pub trait KeyProvider: Send + Sync {
    fn signing_key(&self) -> Result<Arc<SigningKey>, LedgerError>;
}

/// A key held in memory.
pub struct StaticKey(Arc<SigningKey>);

impl StaticKey {
    pub fn new(key: SigningKey) -> Self {
        Self(Arc::new(key))
    }
}

impl KeyProvider for StaticKey {
    fn signing_key(&self) -> Result<Arc<SigningKey>, LedgerError> {
        Ok(Arc::clone(&self.0))
    }
}

/// A hex-encoded key file, read on first use.
///
/// A missing or malformed file fails each sign call with
/// [`LedgerError::SigningKeyUnavailable`] until it is fixed.
pub struct FileKey {
    path: PathBuf,
    key: OnceLock<Arc<SigningKey>>,
}

impl FileKey {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: OnceLock::new(),
        }
    }
}

impl KeyProvider for FileKey {
    fn signing_key(&self) -> Result<Arc<SigningKey>, LedgerError> {
        if let Some(key) = self.key.get() {
            return Ok(Arc::clone(key));
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            LedgerError::SigningKeyUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        let key = SigningKey::from_hex(&text).map_err(|e| {
            LedgerError::SigningKeyUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        Ok(Arc::clone(self.key.get_or_init(|| Arc::new(key))))
    }
}

/// No key configured; every sign call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct MissingKey;

impl KeyProvider for MissingKey {
    fn signing_key(&self) -> Result<Arc<SigningKey>, LedgerError> {
        Err(LedgerError::SigningKeyUnavailable(
            "no signing key configured".into(),
        ))
    }
}

/// Signing service configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub digest: ChainDigest,
    pub quota: SignatureQuota,
    /// How many times a moved chain tail is retried before giving up.
    pub max_tail_retries: u32,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            digest: ChainDigest::default(),
            quota: SignatureQuota::Unlimited,
            max_tail_retries: 5,
        }
    }
}

/// Creates acknowledgments and extends document hash chains.
pub struct SigningService<L> {
    ledger: Arc<L>,
    keys: Arc<dyn KeyProvider>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: SigningConfig,
    span: Span,
}

impl<L> SigningService<L>
where
    L: LedgerReader + LedgerWriter,
{
    pub fn new(ledger: Arc<L>, keys: Arc<dyn KeyProvider>, config: SigningConfig) -> Self {
        Self {
            ledger,
            keys,
            events: Arc::new(NoopSink),
            clock: Arc::new(SystemClock),
            config,
            span: Span::none(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Parent span for everything this service logs.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    /// Record that `request.signer` acknowledged `request.doc_id`.
    ///
    /// Fails with [`LedgerError::DuplicateAcknowledgment`] when the signer
    /// already acknowledged the document; the error carries the stored
    /// record. A moved chain tail is retried up to `max_tail_retries` times.
    pub async fn sign(&self, request: SignRequest) -> Result<SignatureRecord, LedgerError> {
        let span = tracing::info_span!(
            parent: &self.span,
            "sign",
            tenant = %request.tenant_id,
            doc_id = %request.doc_id,
            subject = %request.signer.subject,
        );
        self.sign_inner(request).instrument(span).await
    }

    async fn sign_inner(&self, request: SignRequest) -> Result<SignatureRecord, LedgerError> {
        request.validate()?;
        let digest = self.config.digest;
        let mut conflicts = 0u32;

        loop {
            if let Some(existing) = self
                .ledger
                .find(&request.doc_id, &request.signer.subject)
                .await?
            {
                debug!("already acknowledged");
                return Err(LedgerError::DuplicateAcknowledgment(Box::new(existing)));
            }

            let count = self.ledger.record_count(&request.doc_id).await?;
            self.config.quota.check(&request.doc_id, count)?;

            let tail = self.ledger.tail(&request.doc_id).await?;
            let prev_hash = match &tail {
                Some(tail) => tail
                    .record_hash(digest)
                    .map_err(|e| LedgerError::Serialization(e.to_string()))?,
                None => genesis_hash(digest, &request.doc_id),
            };

            let signed_at = truncate_micros(self.clock.now());
            let nonce = Nonce::random();
            let payload_hash = payload_hash(
                digest,
                &request.doc_id,
                &request.signer,
                signed_at,
                &nonce,
            )?;
            let key = self.keys.signing_key()?;
            let signature = key.sign(payload_hash.as_bytes());

            let record = SignatureRecord {
                tenant_id: request.tenant_id.clone(),
                doc_id: request.doc_id.clone(),
                user_subject: request.signer.subject.clone(),
                user_email: request.signer.email.clone(),
                signed_at,
                created_at: signed_at,
                payload_hash,
                signature,
                nonce,
                prev_hash,
                referer: request.referer.clone(),
            };

            let expected_tail = tail.as_ref().map(|t| t.user_subject.as_str());
            match self.ledger.append(&record, expected_tail).await {
                Ok(()) => {
                    info!(
                        payload_hash = %record.payload_hash.short_hex(),
                        position = count,
                        "acknowledgment recorded"
                    );
                    self.publish(&record).await;
                    return Ok(record);
                }
                Err(LedgerError::TailConflict { doc_id }) => {
                    if conflicts >= self.config.max_tail_retries {
                        warn!(conflicts, "chain tail kept moving, giving up");
                        return Err(LedgerError::TailConflict { doc_id });
                    }
                    conflicts += 1;
                    debug!(conflicts, "chain tail moved, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn publish(&self, record: &SignatureRecord) {
        let event = DomainEvent::document_signed(record);
        if let Err(e) = self.events.publish(&event).await {
            // The record is committed; replay re-emits the event later.
            warn!(event_id = %event.id, error = %e, "event publication failed");
        }
    }
}
