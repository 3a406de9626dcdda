use std::sync::Arc;

use ack_ledger::{DomainEvent, EventError, EventSink};
use ack_types::{Clock, SystemClock};
use ack_worker::WorkQueue;
use async_trait::async_trait;
use tracing::debug;

use crate::webhook::{WebhookItem, WebhookRegistry};

/// Turns each domain event into one webhook item per matching subscription.
///
/// Enqueueing is keyed on `{event_id}:{subscription_id}`, so publishing the
/// same event twice (a replay, a retried commit) never duplicates delivery.
pub struct WebhookFanout<Q, R> {
    queue: Arc<Q>,
    registry: Arc<R>,
    clock: Arc<dyn Clock>,
}

impl<Q: WorkQueue, R: WebhookRegistry> WebhookFanout<Q, R> {
    pub fn new(queue: Arc<Q>, registry: Arc<R>) -> Self {
        Self {
            queue,
            registry,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl<Q: WorkQueue + 'static, R: WebhookRegistry + 'static> EventSink for WebhookFanout<Q, R> {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventError> {
        let subscriptions = self
            .registry
            .subscribers(&event.tenant_id, &event.event_type)
            .await
            .map_err(|e| EventError::Unavailable(e.to_string()))?;

        let now = self.clock.now();
        for subscription in subscriptions {
            let item = WebhookItem::from_event(event, &subscription.id)
                .into_work_item(event.tenant_id.clone())
                .map_err(|e| EventError::Rejected(e.to_string()))?;
            let fresh = self
                .queue
                .enqueue(item, now)
                .await
                .map_err(|e| EventError::Unavailable(e.to_string()))?;
            debug!(
                event_id = %event.id,
                subscription = %subscription.id,
                fresh,
                "webhook delivery queued"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ack_ledger::DOCUMENT_SIGNED;
    use ack_types::{ItemStatus, TenantId};
    use ack_worker::InMemoryQueue;
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::memory::InMemoryWebhookRegistry;
    use crate::webhook::WebhookSubscription;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    fn subscription(id: &str, tenant_id: &str, events: &[&str]) -> WebhookSubscription {
        WebhookSubscription {
            id: id.into(),
            tenant_id: tenant(tenant_id),
            url: format!("https://hooks.example/{id}"),
            secret: "s".into(),
            events: events.iter().map(|e| e.to_string()).collect(),
            active: true,
        }
    }

    #[tokio::test]
    async fn one_item_per_matching_subscription_and_no_duplicates() {
        let queue = Arc::new(InMemoryQueue::new());
        let registry = Arc::new(InMemoryWebhookRegistry::new());
        registry.add(subscription("sub_all", "acme", &[]));
        registry.add(subscription("sub_signed", "acme", &[DOCUMENT_SIGNED]));
        registry.add(subscription("sub_email", "acme", &["email.sent"]));
        registry.add(subscription("sub_other_tenant", "globex", &[]));
        let mut off = subscription("sub_off", "acme", &[]);
        off.active = false;
        registry.add(off);

        let fanout = WebhookFanout::new(Arc::clone(&queue), registry);
        let event = DomainEvent::new(
            "evt_1",
            tenant("acme"),
            DOCUMENT_SIGNED,
            Utc::now(),
            json!({"docId": "d"}),
        );

        fanout.publish(&event).await.unwrap();
        fanout.publish(&event).await.unwrap();

        let mut keys: Vec<_> = queue
            .all()
            .into_iter()
            .map(|item| {
                assert_eq!(item.status, ItemStatus::Pending);
                assert_eq!(item.kind, DOCUMENT_SIGNED);
                item.idempotency_key
            })
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["evt_1:sub_all", "evt_1:sub_signed"]);
    }

    #[tokio::test]
    async fn no_subscribers_is_not_an_error() {
        let queue = Arc::new(InMemoryQueue::new());
        let fanout = WebhookFanout::new(Arc::clone(&queue), Arc::new(InMemoryWebhookRegistry::new()));
        let event = DomainEvent::new("evt_2", tenant("acme"), DOCUMENT_SIGNED, Utc::now(), json!({}));
        fanout.publish(&event).await.unwrap();
        assert!(queue.all().is_empty());
    }
}
