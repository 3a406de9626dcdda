//! Append-only acknowledgment ledger for Ackchain.
//!
//! This crate is the heart of Ackchain. It provides:
//! - [`SignatureRecord`], one signed acknowledgment per `(document, signer)`
//! - `LedgerWriter` / `LedgerReader` trait boundaries
//! - `InMemoryLedger` implementation for tests and embedding
//! - [`SigningService`], which extends a document's hash chain
//! - [`ChainVerifier`], which finds the first tampered record of a chain
//! - Domain events emitted on commit and an [`EventReplayer`] to re-emit them

pub mod error;
pub mod events;
pub mod memory;
pub mod quota;
pub mod records;
pub mod replay;
pub mod service;
pub mod traits;
pub mod validation;

pub use error::LedgerError;
pub use events::{
    DomainEvent, EventError, EventSink, MemorySink, NoopSink, DOCUMENT_SIGNED, EMAIL_SENT,
};
pub use memory::InMemoryLedger;
pub use quota::SignatureQuota;
pub use records::{genesis_hash, Nonce, SignRequest, SignatureRecord, SignerIdentity};
pub use replay::{EventReplayer, ReplayReport};
pub use service::{FileKey, KeyProvider, MissingKey, SigningConfig, SigningService, StaticKey};
pub use traits::{LedgerReader, LedgerWriter};
pub use validation::{AuditReport, AuditStatus, BreakReason, ChainStatus, ChainVerifier};
