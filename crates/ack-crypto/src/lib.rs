//! Cryptographic primitives for Ackchain.
//!
//! Provides domain-separated SHA-256/BLAKE3 digests, Ed25519
//! signing/verification, and hash chain link verification.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod chain;
pub mod hasher;
pub mod signer;

pub use chain::{ChainError, ChainLink, HashChainVerifier};
pub use hasher::{ChainDigest, ContentHasher, Digest, HasherError};
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
