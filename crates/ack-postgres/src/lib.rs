//! PostgreSQL storage for Ackchain.
//!
//! - [`PgLedger`]: the acknowledgment ledger, one advisory lock per document
//!   serializing appends
//! - [`PgWorkQueue`]: one named work queue, claims via `FOR UPDATE SKIP LOCKED`
//! - [`PgWebhookRegistry`] and [`PgCredentials`] for the delivery workers
//!
//! The schema lives in `migrations/` and is applied by [`migrate`].

pub mod credentials;
pub mod error;
pub mod ledger;
pub mod pool;
pub mod queue;
pub mod registry;

pub use credentials::PgCredentials;
pub use ledger::PgLedger;
pub use pool::{connect, migrate, DatabaseConfig};
pub use queue::PgWorkQueue;
pub use registry::PgWebhookRegistry;
pub use sqlx::PgPool;
