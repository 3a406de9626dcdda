use std::sync::Arc;

use ack_ledger::{DomainEvent, EventSink, EMAIL_SENT};
use ack_types::{Clock, NewWorkItem, SystemClock, TenantId, WorkerItem};
use ack_worker::{DeliveryError, DeliveryHandler, WorkQueue, WorkerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{EmailConfig, MailRelayConfig};

/// Payload stored on an email [`WorkerItem`]; the item's `kind` names the
/// template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub to: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

/// Turns a template kind and its data into an email body.
///
/// An unknown kind or missing template data is a permanent failure.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, kind: &str, payload: &EmailPayload) -> Result<RenderedEmail, DeliveryError>;
}

/// Built-in plain-text templates.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainRenderer;

pub const SIGNATURE_REQUEST: &str = "signature_request";
pub const SIGNATURE_CONFIRMATION: &str = "signature_confirmation";
pub const MAGIC_LINK: &str = "magic_link";

fn field<'a>(data: &'a Value, name: &str) -> Result<&'a str, DeliveryError> {
    data.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| DeliveryError::Permanent(format!("template data lacks {name:?}")))
}

impl TemplateRenderer for PlainRenderer {
    fn render(&self, kind: &str, payload: &EmailPayload) -> Result<RenderedEmail, DeliveryError> {
        let data = &payload.data;
        let (subject, text) = match kind {
            SIGNATURE_REQUEST => {
                let title = field(data, "docTitle")?;
                let url = field(data, "url")?;
                (
                    format!("Please acknowledge \"{title}\""),
                    format!("You have been asked to read and acknowledge \"{title}\".\n\n{url}\n"),
                )
            }
            SIGNATURE_CONFIRMATION => {
                let title = field(data, "docTitle")?;
                let signed_at = field(data, "signedAt")?;
                (
                    format!("You acknowledged \"{title}\""),
                    format!("Your acknowledgment of \"{title}\" was recorded at {signed_at}.\n"),
                )
            }
            MAGIC_LINK => {
                let url = field(data, "url")?;
                (
                    "Your sign-in link".to_string(),
                    format!("Use this link to sign in. It works once and expires soon.\n\n{url}\n"),
                )
            }
            other => {
                return Err(DeliveryError::Permanent(format!(
                    "no template for email kind {other:?}"
                )))
            }
        };
        Ok(RenderedEmail {
            subject,
            text,
            html: None,
        })
    }
}

/// A rendered email ready for the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError>;
}

/// Posts emails as JSON to an HTTP mail relay.
///
/// 5xx, 408, 429 and network failures are transient; any other 4xx is
/// permanent (the relay refused the message itself).
pub struct HttpMailTransport {
    client: reqwest::Client,
    relay: MailRelayConfig,
}

impl HttpMailTransport {
    pub fn new(relay: MailRelayConfig, config: &EmailConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, relay })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.relay.url).json(email);
        if let Some(key) = &self.relay.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("mail relay: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = format!("mail relay answered {status}");
        if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
            Err(DeliveryError::Transient(message))
        } else {
            Err(DeliveryError::Permanent(message))
        }
    }
}

/// Logs emails instead of sending them. Used when no relay is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        info!(to = %email.to, subject = %email.subject, "email not sent: no relay configured");
        Ok(())
    }
}

/// Renders and sends queued emails, then emits `email.sent`.
pub struct EmailHandler {
    renderer: Arc<dyn TemplateRenderer>,
    transport: Arc<dyn MailTransport>,
    events: Arc<dyn EventSink>,
    from: String,
    clock: Arc<dyn Clock>,
}

impl EmailHandler {
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        transport: Arc<dyn MailTransport>,
        events: Arc<dyn EventSink>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            renderer,
            transport,
            events,
            from: from.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl DeliveryHandler for EmailHandler {
    async fn handle(&self, item: &WorkerItem) -> Result<(), DeliveryError> {
        let payload: EmailPayload = serde_json::from_value(item.payload.clone())
            .map_err(|e| DeliveryError::Permanent(format!("malformed email item: {e}")))?;
        let rendered = self.renderer.render(&item.kind, &payload)?;

        let email = OutgoingEmail {
            from: self.from.clone(),
            to: payload.to.clone(),
            subject: rendered.subject,
            text: rendered.text,
            html: rendered.html,
        };
        self.transport.send(&email).await?;

        // The email is out; failing here would only resend it.
        let event = DomainEvent::new(
            format!("evt_email_{}", item.id),
            item.tenant_id.clone(),
            EMAIL_SENT,
            self.clock.now(),
            json!({
                "to": payload.to,
                "kind": item.kind,
                "itemId": item.id.to_string(),
            }),
        );
        if let Err(e) = self.events.publish(&event).await {
            warn!(item = %item.id, error = %e, "email.sent publication failed");
        }
        Ok(())
    }
}

/// Producer side of the email queue.
pub struct EmailOutbox<Q> {
    queue: Arc<Q>,
    clock: Arc<dyn Clock>,
}

impl<Q: WorkQueue> EmailOutbox<Q> {
    pub fn new(queue: Arc<Q>) -> Self {
        Self {
            queue,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Queue an email of template `kind`. Returns `false` when an email with
    /// the same idempotency key was already queued.
    pub async fn queue(
        &self,
        tenant_id: TenantId,
        kind: &str,
        to: &str,
        data: Value,
        idempotency_key: &str,
    ) -> Result<bool, WorkerError> {
        let payload = EmailPayload {
            to: to.to_string(),
            locale: None,
            data,
        };
        let payload =
            serde_json::to_value(payload).map_err(|e| WorkerError::Storage(e.to_string()))?;
        self.queue
            .enqueue(
                NewWorkItem::new(tenant_id, kind, payload, idempotency_key),
                self.clock.now(),
            )
            .await
    }
}
