use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::records::SignatureRecord;
use crate::traits::{LedgerReader, LedgerWriter};

/// In-memory ledger for tests, local demos, and embedding.
///
/// A single write lock serializes appends, which gives every document chain
/// a total order.
#[derive(Default)]
pub struct InMemoryLedger {
    pub(crate) inner: RwLock<LedgerState>,
}

#[derive(Default)]
pub(crate) struct LedgerState {
    pub(crate) chains: BTreeMap<String, Vec<SignatureRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.inner
            .read()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".into()))
    }

    /// Overwrite a stored record in place. Only tamper tests need this.
    #[cfg(test)]
    pub(crate) fn tamper(&self, doc_id: &str, index: usize, f: impl FnOnce(&mut SignatureRecord)) {
        let mut state = self.inner.write().unwrap();
        let chain = state.chains.get_mut(doc_id).unwrap();
        f(&mut chain[index]);
    }
}

#[async_trait]
impl LedgerWriter for InMemoryLedger {
    async fn append(
        &self,
        record: &SignatureRecord,
        expected_tail: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".into()))?;
        let chain = state.chains.entry(record.doc_id.clone()).or_default();

        if let Some(existing) = chain
            .iter()
            .find(|r| r.user_subject == record.user_subject)
        {
            return Err(LedgerError::DuplicateAcknowledgment(Box::new(
                existing.clone(),
            )));
        }

        let current_tail = chain.last().map(|r| r.user_subject.as_str());
        if current_tail != expected_tail || chain.iter().any(|r| r.prev_hash == record.prev_hash) {
            return Err(LedgerError::TailConflict {
                doc_id: record.doc_id.clone(),
            });
        }

        chain.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl LedgerReader for InMemoryLedger {
    async fn find(
        &self,
        doc_id: &str,
        user_subject: &str,
    ) -> Result<Option<SignatureRecord>, LedgerError> {
        let state = self.read_state()?;
        Ok(state
            .chains
            .get(doc_id)
            .and_then(|chain| chain.iter().find(|r| r.user_subject == user_subject))
            .cloned())
    }

    async fn tail(&self, doc_id: &str) -> Result<Option<SignatureRecord>, LedgerError> {
        let state = self.read_state()?;
        Ok(state.chains.get(doc_id).and_then(|c| c.last()).cloned())
    }

    async fn read_chain(&self, doc_id: &str) -> Result<Vec<SignatureRecord>, LedgerError> {
        let state = self.read_state()?;
        Ok(state.chains.get(doc_id).cloned().unwrap_or_default())
    }

    async fn documents(&self) -> Result<Vec<String>, LedgerError> {
        let state = self.read_state()?;
        Ok(state
            .chains
            .iter()
            .filter(|(_, chain)| !chain.is_empty())
            .map(|(doc_id, _)| doc_id.clone())
            .collect())
    }

    async fn record_count(&self, doc_id: &str) -> Result<u64, LedgerError> {
        let state = self.read_state()?;
        Ok(state.chains.get(doc_id).map_or(0, |c| c.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use ack_crypto::{ChainDigest, SigningKey};
    use ack_types::truncate_micros;
    use chrono::Utc;

    use super::*;
    use crate::records::{fixtures, genesis_hash};

    #[tokio::test]
    async fn append_enforces_tail_and_uniqueness() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate();
        let now = truncate_micros(Utc::now());

        let alice = fixtures::record(&key, "doc", "alice", genesis_hash(ChainDigest::Sha256, "doc"), now);
        ledger.append(&alice, None).await.unwrap();

        let again = fixtures::record(&key, "doc", "alice", alice.record_hash(ChainDigest::Sha256).unwrap(), now);
        let err = ledger.append(&again, Some("alice")).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateAcknowledgment(ref r) if **r == alice));

        let stale = fixtures::record(&key, "doc", "bob", genesis_hash(ChainDigest::Sha256, "doc"), now);
        let err = ledger.append(&stale, None).await.unwrap_err();
        assert_eq!(err, LedgerError::TailConflict { doc_id: "doc".into() });

        let bob = fixtures::record(&key, "doc", "bob", alice.record_hash(ChainDigest::Sha256).unwrap(), now);
        ledger.append(&bob, Some("alice")).await.unwrap();

        assert_eq!(ledger.record_count("doc").await.unwrap(), 2);
        assert_eq!(ledger.tail("doc").await.unwrap().unwrap().user_subject, "bob");
        assert_eq!(ledger.documents().await.unwrap(), vec!["doc".to_string()]);
    }

    #[tokio::test]
    async fn rejects_shared_predecessor() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate();
        let now = truncate_micros(Utc::now());
        let genesis = genesis_hash(ChainDigest::Sha256, "doc");

        ledger
            .append(&fixtures::record(&key, "doc", "alice", genesis, now), None)
            .await
            .unwrap();
        // Right tail subject, but a predecessor already taken.
        let forged = fixtures::record(&key, "doc", "bob", genesis, now);
        let err = ledger.append(&forged, Some("alice")).await.unwrap_err();
        assert!(matches!(err, LedgerError::TailConflict { .. }));
    }

    #[tokio::test]
    async fn empty_document_reads() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.read_chain("nope").await.unwrap().is_empty());
        assert!(ledger.tail("nope").await.unwrap().is_none());
        assert_eq!(ledger.record_count("nope").await.unwrap(), 0);
        assert!(ledger.documents().await.unwrap().is_empty());
    }
}
