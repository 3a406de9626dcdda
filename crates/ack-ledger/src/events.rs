use std::sync::Mutex;

use ack_types::TenantId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::records::SignatureRecord;

/// Emitted once an acknowledgment is committed.
pub const DOCUMENT_SIGNED: &str = "document.signed";

/// Emitted once a notification email was handed to the transport.
pub const EMAIL_SENT: &str = "email.sent";

/// A fact about the ledger or the delivery fabric, addressed to a tenant's
/// webhook subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// Stable identifier; re-publishing the same fact yields the same id.
    pub id: String,
    pub tenant_id: TenantId,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}

impl DomainEvent {
    pub fn new(
        id: impl Into<String>,
        tenant_id: TenantId,
        event_type: impl Into<String>,
        created_at: DateTime<Utc>,
        data: Value,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id,
            event_type: event_type.into(),
            created_at,
            data,
        }
    }

    /// The "document acknowledged" event, derived from the committed record
    /// alone.
    pub fn document_signed(record: &SignatureRecord) -> Self {
        Self::new(
            record.event_id(),
            record.tenant_id.clone(),
            DOCUMENT_SIGNED,
            record.created_at,
            json!({
                "docId": record.doc_id,
                "userSubject": record.user_subject,
                "userEmail": record.user_email,
                "signedAt": record.signed_at,
                "payloadHash": record.payload_hash,
                "signature": record.signature,
                "referer": record.referer,
            }),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event sink unavailable: {0}")]
    Unavailable(String),

    #[error("event rejected: {0}")]
    Rejected(String),
}

/// Destination for domain events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventError>;
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn publish(&self, _event: &DomainEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Keeps published events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError::Unavailable("memory sink poisoned".into()))?
            .push(event.clone());
        Ok(())
    }
}
