use std::sync::Arc;

use ack_types::{Clock, ItemId, NewWorkItem, SystemClock, TenantId, WorkerItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::QueueSettings;
use crate::engine::{Job, TenantOutcome};
use crate::error::WorkerError;

/// Persistent queue of [`WorkerItem`]s.
///
/// Implementations must make `claim_due` atomic: an item moves from
/// `pending` to `in_flight` for exactly one caller, even across processes.
/// Terminal items (`delivered`, `dead`) are never modified.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Add an item. Returns `false` when an item with the same idempotency
    /// key already exists; the existing item is left untouched.
    async fn enqueue(&self, item: NewWorkItem, now: DateTime<Utc>) -> Result<bool, WorkerError>;

    /// Tenants with pending or in-flight items.
    async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError>;

    /// Claim up to `limit` due items of `tenant`, oldest due first.
    async fn claim_due(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkerItem>, WorkerError>;

    async fn mark_delivered(&self, id: ItemId, now: DateTime<Utc>) -> Result<(), WorkerError>;

    /// Return a failed item to pending with its new attempt count.
    async fn reschedule(
        &self,
        id: ItemId,
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), WorkerError>;

    async fn mark_dead(
        &self,
        id: ItemId,
        attempt: u32,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<(), WorkerError>;

    /// Return one in-flight item to pending without counting an attempt.
    async fn release(&self, id: ItemId) -> Result<(), WorkerError>;

    /// Release in-flight items of `tenant` claimed before `claimed_before`.
    /// Their attempt counters are unchanged.
    async fn release_stale(
        &self,
        tenant: &TenantId,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, WorkerError>;

    async fn get(&self, id: ItemId) -> Result<Option<WorkerItem>, WorkerError>;

    /// Dead-lettered items of `tenant`, most recent first.
    async fn list_dead(&self, tenant: &TenantId, limit: u32)
        -> Result<Vec<WorkerItem>, WorkerError>;
}

/// Outcome of a failed delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Worth retrying later: timeouts, connection failures, non-2xx replies.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Retrying cannot help: the item is dead-lettered immediately.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

/// Performs the side effect of one claimed item.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, item: &WorkerItem) -> Result<(), DeliveryError>;
}

/// What happened to one item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fate {
    Delivered,
    Retried,
    Dead,
}

/// A [`Job`] that drains a [`WorkQueue`] through a [`DeliveryHandler`].
///
/// Per tenant and tick: release stale claims, claim a batch of due items,
/// hand each to the handler. Success marks the item delivered. A transient
/// failure reschedules it with exponential backoff until `max_attempts`
/// handler invocations were spent, then dead-letters it. A permanent failure
/// dead-letters it at once.
///
/// Once the run has spent `tenant_budget`, the items of the batch not yet
/// started are released instead of being left in flight. An item whose
/// outcome cannot be recorded is counted as failed and the batch goes on;
/// its claim expires through the visibility timeout.
pub struct QueueJob<Q, H> {
    name: String,
    queue: Arc<Q>,
    handler: Arc<H>,
    settings: QueueSettings,
    clock: Arc<dyn Clock>,
}

impl<Q, H> QueueJob<Q, H>
where
    Q: WorkQueue + 'static,
    H: DeliveryHandler,
{
    pub fn new(
        name: impl Into<String>,
        queue: Arc<Q>,
        handler: Arc<H>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            handler,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    async fn process(&self, item: &WorkerItem) -> Result<Fate, WorkerError> {
        let result = self.handler.handle(item).await;
        let now = self.clock.now();
        let attempt = item.attempt.saturating_add(1);

        match result {
            Ok(()) => {
                self.queue.mark_delivered(item.id, now).await?;
                debug!(item_id = %item.id, kind = %item.kind, attempt, "delivered");
                Ok(Fate::Delivered)
            }
            Err(DeliveryError::Transient(reason)) if attempt < self.settings.max_attempts => {
                let delay = self.settings.backoff.delay(attempt);
                let next_attempt_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.queue
                    .reschedule(item.id, attempt, next_attempt_at, &reason)
                    .await?;
                warn!(
                    item_id = %item.id,
                    kind = %item.kind,
                    attempt,
                    retry_in_secs = delay.as_secs(),
                    error = %reason,
                    "delivery failed, retrying"
                );
                Ok(Fate::Retried)
            }
            Err(e) => {
                self.queue
                    .mark_dead(item.id, attempt, now, e.message())
                    .await?;
                warn!(
                    item_id = %item.id,
                    kind = %item.kind,
                    attempt,
                    error = %e,
                    "delivery dead-lettered"
                );
                Ok(Fate::Dead)
            }
        }
    }
}

#[async_trait]
impl<Q, H> Job for QueueJob<Q, H>
where
    Q: WorkQueue + 'static,
    H: DeliveryHandler,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError> {
        self.queue.tenants().await
    }

    async fn run_tenant(
        &self,
        tenant: &TenantId,
        cancel: &CancellationToken,
    ) -> Result<TenantOutcome, WorkerError> {
        let mut outcome = TenantOutcome::default();
        let now = self.clock.now();

        let visibility = chrono::Duration::from_std(self.settings.visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        if let Some(cutoff) = now.checked_sub_signed(visibility) {
            outcome.released = self.queue.release_stale(tenant, cutoff).await?;
            if outcome.released > 0 {
                info!(released = outcome.released, "released stale claims");
            }
        }

        if cancel.is_cancelled() {
            return Ok(outcome);
        }

        let started = Instant::now();
        let items = self
            .queue
            .claim_due(tenant, now, self.settings.batch_size)
            .await?;
        let mut batch = items.iter();
        for item in batch.by_ref() {
            match self.process(item).await {
                Ok(Fate::Delivered) => outcome.delivered += 1,
                Ok(Fate::Retried) => outcome.retried += 1,
                Ok(Fate::Dead) => outcome.dead += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(item_id = %item.id, error = %e, "cannot record delivery outcome");
                }
            }
            if started.elapsed() >= self.settings.tenant_budget {
                break;
            }
        }

        let unstarted: Vec<&WorkerItem> = batch.collect();
        if !unstarted.is_empty() {
            for item in &unstarted {
                match self.queue.release(item.id).await {
                    Ok(()) => outcome.released += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        warn!(item_id = %item.id, error = %e, "cannot release unstarted item");
                    }
                }
            }
            info!(
                unstarted = unstarted.len(),
                budget_secs = self.settings.tenant_budget.as_secs_f64(),
                "batch budget spent, returned the rest to pending"
            );
        }
        Ok(outcome)
    }
}
