//! Foundation types for Ackchain.
//!
//! This crate provides the identity, temporal, and queue types shared by the
//! signature ledger and the background delivery workers. Every other Ackchain
//! crate depends on `ack-types`.
//!
//! # Key Types
//!
//! - [`TenantId`]: Isolation boundary workers iterate independently
//! - [`Clock`]: Injected time source ([`SystemClock`], [`ManualClock`])
//! - [`WorkerItem`]: Shared shape of webhook deliveries and queued emails
//! - [`ItemStatus`]: Work item lifecycle state
//! - [`ExpiringCredential`]: Shared shape of sessions and magic-link tokens

pub mod credential;
pub mod error;
pub mod item;
pub mod temporal;
pub mod tenant;

pub use credential::{CredentialKind, ExpiringCredential};
pub use error::TypeError;
pub use item::{ItemId, ItemStatus, NewWorkItem, WorkerItem};
pub use temporal::{truncate_micros, Clock, ManualClock, SystemClock};
pub use tenant::TenantId;
