use ack_delivery::{WebhookRegistry, WebhookSubscription};
use ack_types::TenantId;
use ack_worker::WorkerError;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::worker_error;

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    tenant_id: String,
    id: String,
    url: String,
    secret: String,
    events: Vec<String>,
    active: bool,
}

impl TryFrom<SubscriptionRow> for WebhookSubscription {
    type Error = WorkerError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(WebhookSubscription {
            id: row.id,
            tenant_id: TenantId::new(row.tenant_id)?,
            url: row.url,
            secret: row.secret,
            events: row.events,
            active: row.active,
        })
    }
}

/// Reads the `webhook_subscriptions` table maintained by the admin API.
#[derive(Clone)]
pub struct PgWebhookRegistry {
    pool: PgPool,
}

impl PgWebhookRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookRegistry for PgWebhookRegistry {
    async fn get(
        &self,
        tenant: &TenantId,
        subscription_id: &str,
    ) -> Result<Option<WebhookSubscription>, WorkerError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            "SELECT tenant_id, id, url, secret, events, active
             FROM webhook_subscriptions WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant.as_str())
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(worker_error)?;
        row.map(WebhookSubscription::try_from).transpose()
    }

    async fn subscribers(
        &self,
        tenant: &TenantId,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, WorkerError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            "SELECT tenant_id, id, url, secret, events, active
             FROM webhook_subscriptions
             WHERE tenant_id = $1 AND active
               AND (cardinality(events) = 0 OR $2 = ANY(events) OR '*' = ANY(events))
             ORDER BY id",
        )
        .bind(tenant.as_str())
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(worker_error)?;
        rows.into_iter().map(WebhookSubscription::try_from).collect()
    }
}
