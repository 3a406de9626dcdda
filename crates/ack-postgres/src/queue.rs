use ack_types::{ItemId, ItemStatus, NewWorkItem, TenantId, WorkerItem};
use ack_worker::{WorkQueue, WorkerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::worker_error;

const ITEM_COLUMNS: &str = "id, tenant_id, kind, payload, idempotency_key, status, attempt, \
     next_attempt_at, last_error, created_at, claimed_at, completed_at";

#[derive(sqlx::FromRow)]
pub(crate) struct ItemRow {
    id: Uuid,
    tenant_id: String,
    kind: String,
    payload: Value,
    idempotency_key: String,
    status: String,
    attempt: i32,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ItemRow> for WorkerItem {
    type Error = WorkerError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(WorkerItem {
            id: ItemId::from_uuid(row.id),
            tenant_id: TenantId::new(row.tenant_id)?,
            kind: row.kind,
            payload: row.payload,
            idempotency_key: row.idempotency_key,
            status: row.status.parse::<ItemStatus>()?,
            attempt: u32::try_from(row.attempt)
                .map_err(|_| WorkerError::InvalidState(format!("negative attempt on {}", row.id)))?,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
            completed_at: row.completed_at,
        })
    }
}

fn attempt_param(attempt: u32) -> Result<i32, WorkerError> {
    i32::try_from(attempt).map_err(|_| WorkerError::InvalidState(format!("attempt {attempt} out of range")))
}

/// One named work queue (`webhook`, `email`) in the `worker_items` table.
///
/// Idempotency keys are unique per queue. Every transition out of
/// `in_flight` is conditional on the item still being `in_flight`, so a
/// terminal item is never written again.
#[derive(Clone)]
pub struct PgWorkQueue {
    pool: PgPool,
    queue: String,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool, queue: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.queue
    }

    /// Explain why a conditional transition matched no row.
    async fn transition_failed(&self, id: ItemId, wanted: ItemStatus) -> WorkerError {
        let status: Result<Option<String>, _> =
            sqlx::query_scalar("SELECT status FROM worker_items WHERE id = $1 AND queue = $2")
                .bind(id.as_uuid())
                .bind(&self.queue)
                .fetch_optional(&self.pool)
                .await;
        match status {
            Ok(Some(current)) => {
                WorkerError::InvalidState(format!("item {id} is {current}, cannot become {wanted}"))
            }
            Ok(None) => WorkerError::ItemNotFound(id.to_string()),
            Err(e) => worker_error(e),
        }
    }
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn enqueue(&self, item: NewWorkItem, now: DateTime<Utc>) -> Result<bool, WorkerError> {
        let item = item.into_item(now);
        let result = sqlx::query(&format!(
            "INSERT INTO worker_items (queue, {ITEM_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (queue, idempotency_key) DO NOTHING"
        ))
        .bind(&self.queue)
        .bind(item.id.as_uuid())
        .bind(item.tenant_id.as_str())
        .bind(&item.kind)
        .bind(&item.payload)
        .bind(&item.idempotency_key)
        .bind(item.status.as_str())
        .bind(attempt_param(item.attempt)?)
        .bind(item.next_attempt_at)
        .bind(item.last_error.as_deref())
        .bind(item.created_at)
        .bind(item.claimed_at)
        .bind(item.completed_at)
        .execute(&self.pool)
        .await
        .map_err(worker_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT tenant_id FROM worker_items
             WHERE queue = $1 AND status IN ('pending', 'in_flight')
             ORDER BY tenant_id",
        )
        .bind(&self.queue)
        .fetch_all(&self.pool)
        .await
        .map_err(worker_error)?;
        ids.into_iter()
            .map(|id| TenantId::new(id).map_err(WorkerError::from))
            .collect()
    }

    async fn claim_due(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkerItem>, WorkerError> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "UPDATE worker_items SET status = 'in_flight', claimed_at = $3
             WHERE id IN (
                 SELECT id FROM worker_items
                 WHERE queue = $1 AND tenant_id = $2 AND status = 'pending'
                   AND next_attempt_at <= $3
                 ORDER BY next_attempt_at, created_at
                 LIMIT $4
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(&self.queue)
        .bind(tenant.as_str())
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(worker_error)?;

        let mut items = rows
            .into_iter()
            .map(WorkerItem::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        items.sort_by_key(|i| (i.next_attempt_at, i.created_at));
        Ok(items)
    }

    async fn mark_delivered(&self, id: ItemId, now: DateTime<Utc>) -> Result<(), WorkerError> {
        let result = sqlx::query(
            "UPDATE worker_items SET status = 'delivered', completed_at = $3
             WHERE id = $1 AND queue = $2 AND status = 'in_flight'",
        )
        .bind(id.as_uuid())
        .bind(&self.queue)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(worker_error)?;
        if result.rows_affected() == 0 {
            return Err(self.transition_failed(id, ItemStatus::Delivered).await);
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: ItemId,
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), WorkerError> {
        let result = sqlx::query(
            "UPDATE worker_items
             SET status = 'pending', attempt = $3, next_attempt_at = $4, last_error = $5,
                 claimed_at = NULL
             WHERE id = $1 AND queue = $2 AND status = 'in_flight' AND attempt <= $3",
        )
        .bind(id.as_uuid())
        .bind(&self.queue)
        .bind(attempt_param(attempt)?)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(worker_error)?;
        if result.rows_affected() == 0 {
            return Err(self.transition_failed(id, ItemStatus::Pending).await);
        }
        Ok(())
    }

    async fn mark_dead(
        &self,
        id: ItemId,
        attempt: u32,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<(), WorkerError> {
        let result = sqlx::query(
            "UPDATE worker_items
             SET status = 'dead', attempt = $3, completed_at = $4, last_error = $5
             WHERE id = $1 AND queue = $2 AND status = 'in_flight' AND attempt <= $3",
        )
        .bind(id.as_uuid())
        .bind(&self.queue)
        .bind(attempt_param(attempt)?)
        .bind(now)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(worker_error)?;
        if result.rows_affected() == 0 {
            return Err(self.transition_failed(id, ItemStatus::Dead).await);
        }
        Ok(())
    }

    async fn release(&self, id: ItemId) -> Result<(), WorkerError> {
        let result = sqlx::query(
            "UPDATE worker_items SET status = 'pending', claimed_at = NULL
             WHERE id = $1 AND queue = $2 AND status = 'in_flight'",
        )
        .bind(id.as_uuid())
        .bind(&self.queue)
        .execute(&self.pool)
        .await
        .map_err(worker_error)?;
        if result.rows_affected() == 0 {
            return Err(self.transition_failed(id, ItemStatus::Pending).await);
        }
        Ok(())
    }

    async fn release_stale(
        &self,
        tenant: &TenantId,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, WorkerError> {
        let result = sqlx::query(
            "UPDATE worker_items SET status = 'pending', claimed_at = NULL
             WHERE queue = $1 AND tenant_id = $2 AND status = 'in_flight'
               AND claimed_at < $3",
        )
        .bind(&self.queue)
        .bind(tenant.as_str())
        .bind(claimed_before)
        .execute(&self.pool)
        .await
        .map_err(worker_error)?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: ItemId) -> Result<Option<WorkerItem>, WorkerError> {
        let row: Option<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM worker_items WHERE id = $1 AND queue = $2"
        ))
        .bind(id.as_uuid())
        .bind(&self.queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(worker_error)?;
        row.map(WorkerItem::try_from).transpose()
    }

    async fn list_dead(
        &self,
        tenant: &TenantId,
        limit: u32,
    ) -> Result<Vec<WorkerItem>, WorkerError> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM worker_items
             WHERE queue = $1 AND tenant_id = $2 AND status = 'dead'
             ORDER BY completed_at DESC
             LIMIT $3"
        ))
        .bind(&self.queue)
        .bind(tenant.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(worker_error)?;
        rows.into_iter().map(WorkerItem::try_from).collect()
    }
}
