use crate::hasher::{Digest, HasherError};

/// An element of a hash chain.
///
/// Each link stores the digest of its predecessor; its own digest is
/// recomputed from content, never stored.
pub trait ChainLink {
    /// Digest of the previous link (the genesis value for the first).
    fn prev_hash(&self) -> Digest;
    /// Digest of this link, computed from its content.
    fn link_hash(&self) -> Result<Digest, HasherError>;
}

/// Hash chain integrity verifier.
///
/// Verifies that a sequence of links forms a valid chain: the first link
/// points at the genesis value and each later link's `prev_hash` matches the
/// recomputed digest of the link before it.
pub struct HashChainVerifier;

impl HashChainVerifier {
    /// Verify a whole chain, returning the first broken index.
    pub fn verify_chain<L: ChainLink>(genesis: Digest, links: &[L]) -> Result<(), ChainError> {
        let mut expected = genesis;
        for (index, link) in links.iter().enumerate() {
            if link.prev_hash() != expected {
                return Err(ChainError::BrokenLink { index });
            }
            expected = link.link_hash().map_err(|e| ChainError::Hashing {
                index,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Errors from chain verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("broken link at index {index}: prev_hash does not match predecessor")]
    BrokenLink { index: usize },

    #[error("cannot hash link at index {index}: {reason}")]
    Hashing { index: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::{ChainDigest, ContentHasher};

    /// Test link for chain verification.
    struct TestLink {
        prev: Digest,
        payload: Vec<u8>,
    }

    impl ChainLink for TestLink {
        fn prev_hash(&self) -> Digest {
            self.prev
        }
        fn link_hash(&self) -> Result<Digest, HasherError> {
            let mut data = self.prev.as_bytes().to_vec();
            data.extend_from_slice(&self.payload);
            Ok(ContentHasher::RECORD.hash(ChainDigest::Sha256, &data))
        }
    }

    fn genesis() -> Digest {
        ContentHasher::GENESIS.hash(ChainDigest::Sha256, b"doc-1")
    }

    fn build_chain(count: usize) -> Vec<TestLink> {
        let mut chain: Vec<TestLink> = Vec::new();
        let mut prev = genesis();
        for i in 0..count {
            let link = TestLink {
                prev,
                payload: format!("link-{i}").into_bytes(),
            };
            prev = link.link_hash().unwrap();
            chain.push(link);
        }
        chain
    }

    #[test]
    fn empty_chain_is_valid() {
        let chain: Vec<TestLink> = vec![];
        assert!(HashChainVerifier::verify_chain(genesis(), &chain).is_ok());
    }

    #[test]
    fn multi_link_chain() {
        let chain = build_chain(10);
        assert!(HashChainVerifier::verify_chain(genesis(), &chain).is_ok());
    }

    #[test]
    fn wrong_genesis_breaks_first_link() {
        let chain = build_chain(2);
        let other = ContentHasher::GENESIS.hash(ChainDigest::Sha256, b"doc-2");
        assert_eq!(
            HashChainVerifier::verify_chain(other, &chain).unwrap_err(),
            ChainError::BrokenLink { index: 0 }
        );
    }

    #[test]
    fn tampered_payload_breaks_following_link() {
        let mut chain = build_chain(4);
        chain[1].payload = b"tampered".to_vec();
        assert_eq!(
            HashChainVerifier::verify_chain(genesis(), &chain).unwrap_err(),
            ChainError::BrokenLink { index: 2 }
        );
    }
}
