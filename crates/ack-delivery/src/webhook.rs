use std::sync::Arc;

use ack_ledger::DomainEvent;
use ack_types::{Clock, NewWorkItem, SystemClock, TenantId, WorkerItem};
use ack_worker::{DeliveryError, DeliveryHandler, WorkerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::config::WebhookConfig;

/// Queue name of webhook deliveries.
pub const WEBHOOK_QUEUE: &str = "webhook";
/// Queue name of outgoing emails.
pub const EMAIL_QUEUE: &str = "email";

pub const HEADER_ID: &str = "X-Webhook-Id";
pub const HEADER_EVENT: &str = "X-Webhook-Event";
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";

type HmacSha256 = Hmac<Sha256>;

/// A tenant's webhook endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: String,
    pub tenant_id: TenantId,
    pub url: String,
    /// Shared secret for the signature header.
    pub secret: String,
    /// Event types to deliver; empty means all.
    #[serde(default)]
    pub events: Vec<String>,
    pub active: bool,
}

impl WebhookSubscription {
    pub fn accepts(&self, event_type: &str) -> bool {
        self.active
            && (self.events.is_empty()
                || self.events.iter().any(|e| e == "*" || e == event_type))
    }
}

/// Lookup of webhook subscriptions. Admin CRUD lives elsewhere.
#[async_trait]
pub trait WebhookRegistry: Send + Sync {
    async fn get(
        &self,
        tenant: &TenantId,
        subscription_id: &str,
    ) -> Result<Option<WebhookSubscription>, WorkerError>;

    /// Active subscriptions of `tenant` that accept `event_type`.
    async fn subscribers(
        &self,
        tenant: &TenantId,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, WorkerError>;
}

/// Payload stored on a webhook [`WorkerItem`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookItem {
    pub event_id: String,
    pub event_type: String,
    pub subscription_id: String,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}

impl WebhookItem {
    pub fn from_event(event: &DomainEvent, subscription_id: &str) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            subscription_id: subscription_id.to_string(),
            created_at: event.created_at,
            data: event.data.clone(),
        }
    }

    /// One delivery per `(event, subscription)`.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.event_id, self.subscription_id)
    }

    pub fn into_work_item(self, tenant_id: TenantId) -> Result<NewWorkItem, serde_json::Error> {
        let key = self.idempotency_key();
        let kind = self.event_type.clone();
        Ok(NewWorkItem::new(tenant_id, kind, serde_json::to_value(self)?, key))
    }

    /// JSON body sent to the subscriber.
    pub fn body(&self) -> Value {
        json!({
            "id": self.event_id,
            "type": self.event_type,
            "createdAt": self.created_at,
            "data": self.data,
        })
    }
}

/// `sha256=<hex HMAC-SHA256(secret, "{timestamp}.{body}")>`.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, DeliveryError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| DeliveryError::Permanent("unusable webhook secret".into()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Subscriber-side check of the signature header, in constant time.
pub fn verify_signature(secret: &str, timestamp: i64, body: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Delivers webhook items over HTTP.
///
/// 2xx is success. Timeouts, connection errors and every other status are
/// transient. A missing or disabled subscription is permanent.
pub struct WebhookHandler<R> {
    registry: Arc<R>,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl<R: WebhookRegistry> WebhookHandler<R> {
    pub fn new(registry: Arc<R>, config: &WebhookConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            registry,
            client,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl<R: WebhookRegistry + 'static> DeliveryHandler for WebhookHandler<R> {
    async fn handle(&self, item: &WorkerItem) -> Result<(), DeliveryError> {
        let payload: WebhookItem = serde_json::from_value(item.payload.clone())
            .map_err(|e| DeliveryError::Permanent(format!("malformed webhook item: {e}")))?;

        let subscription = self
            .registry
            .get(&item.tenant_id, &payload.subscription_id)
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;
        let Some(subscription) = subscription.filter(|s| s.active) else {
            return Err(DeliveryError::Permanent(format!(
                "subscription {} is missing or disabled",
                payload.subscription_id
            )));
        };

        let body = serde_json::to_vec(&payload.body())
            .map_err(|e| DeliveryError::Permanent(e.to_string()))?;
        let timestamp = self.clock.now().timestamp();
        let signature = sign_payload(&subscription.secret, timestamp, &body)?;

        let response = self
            .client
            .post(&subscription.url)
            .header(CONTENT_TYPE, "application/json")
            .header(HEADER_ID, &payload.event_id)
            .header(HEADER_EVENT, &payload.event_type)
            .header(HEADER_TIMESTAMP, timestamp.to_string())
            .header(HEADER_SIGNATURE, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Transient(format!("{} timed out", subscription.url))
                } else {
                    DeliveryError::Transient(format!("{}: {e}", subscription.url))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Transient(format!(
                "{} answered {status}",
                subscription.url
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ack_types::ManualClock;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;

    use super::*;
    use crate::memory::InMemoryWebhookRegistry;

    type Captured = Arc<Mutex<Vec<(HeaderMap, Bytes)>>>;

    async fn capture(State(captured): State<Captured>, headers: HeaderMap, body: Bytes) -> StatusCode {
        captured.lock().unwrap().push((headers, body));
        StatusCode::NO_CONTENT
    }

    async fn serve() -> (String, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route("/hook", post(capture))
            .route("/down", post(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route(
                "/slow",
                post(|| async {
                    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                    StatusCode::OK
                }),
            )
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, captured)
    }

    fn tenant() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    fn subscription(id: &str, url: String) -> WebhookSubscription {
        WebhookSubscription {
            id: id.into(),
            tenant_id: tenant(),
            url,
            secret: "whsec_test".into(),
            events: vec![],
            active: true,
        }
    }

    fn work_item(subscription_id: &str) -> WorkerItem {
        let event = DomainEvent::new(
            "evt_abc",
            tenant(),
            "document.signed",
            Utc::now(),
            json!({"docId": "policy-2025"}),
        );
        let mut item = WebhookItem::from_event(&event, subscription_id)
            .into_work_item(tenant())
            .unwrap()
            .into_item(Utc::now());
        item.claim(Utc::now()).unwrap();
        item
    }

    fn handler(registry: Arc<InMemoryWebhookRegistry>, timeout_secs: u64) -> WebhookHandler<InMemoryWebhookRegistry> {
        let config = WebhookConfig {
            request_timeout_secs: timeout_secs,
            ..WebhookConfig::default()
        };
        WebhookHandler::new(registry, &config)
            .unwrap()
            .with_clock(Arc::new(ManualClock::default()))
    }

    #[tokio::test]
    async fn delivers_signed_body() {
        let (base, captured) = serve().await;
        let registry = Arc::new(InMemoryWebhookRegistry::new());
        registry.add(subscription("sub_1", format!("{base}/hook")));

        handler(registry, 5).handle(&work_item("sub_1")).await.unwrap();

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        let (headers, body) = &captured[0];
        assert_eq!(headers[HEADER_ID], "evt_abc");
        assert_eq!(headers[HEADER_EVENT], "document.signed");
        let ts: i64 = headers[HEADER_TIMESTAMP].to_str().unwrap().parse().unwrap();
        assert_eq!(ts, ManualClock::default().now().timestamp());
        let signature = headers[HEADER_SIGNATURE].to_str().unwrap();
        assert!(verify_signature("whsec_test", ts, body, signature));
        assert!(!verify_signature("other", ts, body, signature));

        let json: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json["id"], "evt_abc");
        assert_eq!(json["type"], "document.signed");
        assert_eq!(json["data"]["docId"], "policy-2025");
        assert!(json["createdAt"].is_string());
    }

    #[tokio::test]
    async fn non_2xx_is_transient() {
        let (base, _) = serve().await;
        let registry = Arc::new(InMemoryWebhookRegistry::new());
        registry.add(subscription("sub_1", format!("{base}/down")));

        let err = handler(registry, 5).handle(&work_item("sub_1")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transient(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let (base, _) = serve().await;
        let registry = Arc::new(InMemoryWebhookRegistry::new());
        registry.add(subscription("sub_1", format!("{base}/slow")));

        let err = handler(registry, 1).handle(&work_item("sub_1")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transient(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let registry = Arc::new(InMemoryWebhookRegistry::new());
        // Port 9 (discard) on localhost is closed in test environments.
        registry.add(subscription("sub_1", "http://127.0.0.1:9/hook".into()));
        let err = handler(registry, 2).handle(&work_item("sub_1")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transient(_)));
    }

    #[tokio::test]
    async fn missing_or_disabled_subscription_is_permanent() {
        let registry = Arc::new(InMemoryWebhookRegistry::new());
        let handler = handler(Arc::clone(&registry), 5);
        let err = handler.handle(&work_item("sub_gone")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));

        let mut disabled = subscription("sub_off", "http://127.0.0.1:9/hook".into());
        disabled.active = false;
        registry.add(disabled);
        let err = handler.handle(&work_item("sub_off")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));
    }

    #[test]
    fn signature_format() {
        let sig = sign_payload("secret", 1_700_000_000, b"{}").unwrap();
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert!(verify_signature("secret", 1_700_000_000, b"{}", &sig));
        assert!(!verify_signature("secret", 1_700_000_001, b"{}", &sig));
        assert!(!verify_signature("secret", 1_700_000_000, b"{}", "md5=00"));
    }

    #[test]
    fn subscription_event_filter() {
        let mut sub = subscription("s", "http://x".into());
        assert!(sub.accepts("document.signed"));
        sub.events = vec!["email.sent".into()];
        assert!(!sub.accepts("document.signed"));
        assert!(sub.accepts("email.sent"));
        sub.active = false;
        assert!(!sub.accepts("email.sent"));
    }

    #[test]
    fn idempotency_key_pairs_event_and_subscription() {
        let item = WebhookItem {
            event_id: "evt_1".into(),
            event_type: "document.signed".into(),
            subscription_id: "sub_9".into(),
            created_at: Utc::now(),
            data: json!({}),
        };
        assert_eq!(item.idempotency_key(), "evt_1:sub_9");
    }
}
