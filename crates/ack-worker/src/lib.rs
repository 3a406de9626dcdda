//! Background worker engine for Ackchain.
//!
//! Every delivery and cleanup worker is a [`Job`] driven by a
//! [`WorkerEngine`]: a single owned tokio task that ticks on a fixed
//! interval, runs each tenant independently, and shuts down within a grace
//! period.
//!
//! - [`QueueJob`] turns a [`WorkQueue`] plus a [`DeliveryHandler`] into a job
//!   with retry, exponential [`BackoffPolicy`], and dead-lettering.
//! - [`SweepJob`] turns a [`Sweeper`] into a periodic per-tenant cleanup job.
//! - [`InMemoryQueue`] backs tests and embedded deployments.

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod queue;
pub mod sweep;

pub use backoff::BackoffPolicy;
pub use config::{EngineSettings, QueueSettings, WorkerConfig, WorkerOverrides};
pub use engine::{Job, TenantOutcome, TickReport, WorkerEngine};
pub use error::WorkerError;
pub use memory::InMemoryQueue;
pub use queue::{DeliveryError, DeliveryHandler, QueueJob, WorkQueue};
pub use sweep::{SweepJob, Sweeper};
