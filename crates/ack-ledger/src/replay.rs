use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn, Instrument, Span};

use crate::error::LedgerError;
use crate::events::{DomainEvent, EventSink};
use crate::traits::LedgerReader;

/// Counts from an event replay.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub documents: usize,
    pub published: usize,
    pub failed: usize,
}

/// Re-emits `document.signed` events from committed records.
///
/// Event ids derive from the records, so replaying into an idempotent sink
/// only fills in what a crash between commit and publication lost.
pub struct EventReplayer<R> {
    reader: Arc<R>,
    sink: Arc<dyn EventSink>,
    span: Span,
}

impl<R: LedgerReader> EventReplayer<R> {
    pub fn new(reader: Arc<R>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            reader,
            sink,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub async fn replay_document(&self, doc_id: &str) -> Result<ReplayReport, LedgerError> {
        let mut report = ReplayReport::default();
        self.replay_into(doc_id, &mut report).await?;
        Ok(report)
    }

    pub async fn replay_all(&self) -> Result<ReplayReport, LedgerError> {
        let mut report = ReplayReport::default();
        for doc_id in self.reader.documents().await? {
            self.replay_into(&doc_id, &mut report).await?;
        }
        info!(parent: &self.span, documents = report.documents, published = report.published, failed = report.failed, "replay finished");
        Ok(report)
    }

    async fn replay_into(&self, doc_id: &str, report: &mut ReplayReport) -> Result<(), LedgerError> {
        let span = tracing::debug_span!(parent: &self.span, "replay", doc_id = %doc_id);
        async {
            let records = self.reader.read_chain(doc_id).await?;
            report.documents += 1;
            for record in &records {
                let event = DomainEvent::document_signed(record);
                match self.sink.publish(&event).await {
                    Ok(()) => report.published += 1,
                    Err(e) => {
                        warn!(event_id = %event.id, error = %e, "replay publication failed");
                        report.failed += 1;
                    }
                }
            }
            Ok(())
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use ack_crypto::SigningKey;
    use ack_types::TenantId;

    use super::*;
    use crate::events::MemorySink;
    use crate::memory::InMemoryLedger;
    use crate::records::{SignRequest, SignerIdentity};
    use crate::service::{SigningConfig, SigningService, StaticKey};

    #[tokio::test]
    async fn replay_reproduces_original_events() {
        let ledger = Arc::new(InMemoryLedger::new());
        let live = Arc::new(MemorySink::new());
        let svc = SigningService::new(
            Arc::clone(&ledger),
            Arc::new(StaticKey::new(SigningKey::generate())),
            SigningConfig::default(),
        )
        .with_events(live.clone());

        for (doc, who) in [("a", "alice"), ("a", "bob"), ("b", "alice")] {
            svc.sign(SignRequest::new(
                TenantId::new("acme").unwrap(),
                doc,
                SignerIdentity::new(who, format!("{who}@co")),
            ))
            .await
            .unwrap();
        }

        let replayed = Arc::new(MemorySink::new());
        let replayer = EventReplayer::new(Arc::clone(&ledger), replayed.clone());

        let report = replayer.replay_all().await.unwrap();
        assert_eq!(
            report,
            ReplayReport {
                documents: 2,
                published: 3,
                failed: 0
            }
        );
        assert_eq!(replayed.events(), live.events());

        let single = replayer.replay_document("b").await.unwrap();
        assert_eq!(single.published, 1);
    }
}
