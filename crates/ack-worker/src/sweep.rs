use std::sync::Arc;

use ack_types::{Clock, SystemClock, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::{Job, TenantOutcome};
use crate::error::WorkerError;

/// Periodic per-tenant cleanup, such as deleting expired credentials.
#[async_trait]
pub trait Sweeper: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError>;

    /// Remove what is obsolete at `now`; returns the number of rows removed.
    async fn sweep(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<u64, WorkerError>;
}

/// Adapts a [`Sweeper`] to the engine's [`Job`] interface.
pub struct SweepJob<S> {
    sweeper: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Sweeper> SweepJob<S> {
    pub fn new(sweeper: Arc<S>) -> Self {
        Self {
            sweeper,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sweeper(&self) -> &Arc<S> {
        &self.sweeper
    }
}

#[async_trait]
impl<S: Sweeper> Job for SweepJob<S> {
    fn name(&self) -> &str {
        self.sweeper.name()
    }

    async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError> {
        self.sweeper.tenants().await
    }

    async fn run_tenant(
        &self,
        tenant: &TenantId,
        cancel: &CancellationToken,
    ) -> Result<TenantOutcome, WorkerError> {
        if cancel.is_cancelled() {
            return Ok(TenantOutcome::default());
        }
        let swept = self.sweeper.sweep(tenant, self.clock.now()).await?;
        if swept > 0 {
            info!(swept, "sweep removed rows");
        }
        Ok(TenantOutcome {
            swept,
            ..TenantOutcome::default()
        })
    }
}
