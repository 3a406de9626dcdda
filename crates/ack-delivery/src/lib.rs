//! Delivery fabric for Ackchain.
//!
//! Concrete workers built on `ack-worker`:
//! - [`webhook`]: signed HTTP delivery of domain events, fed by
//!   [`WebhookFanout`]
//! - [`email`]: template rendering and mail transport, fed by [`EmailOutbox`]
//! - [`cleanup`]: expired session and magic-link sweepers
//! - [`magic_link`]: rate-limited magic-link issuance and consumption
//! - [`fleet`]: owns every engine and shuts them down in reverse order

pub mod cleanup;
pub mod config;
pub mod credentials;
pub mod email;
pub mod error;
pub mod fanout;
pub mod fleet;
pub mod magic_link;
pub mod memory;
pub mod webhook;

pub use cleanup::{MagicLinkCleanup, SessionCleanup};
pub use config::{CleanupConfig, EmailConfig, MagicLinkConfig, MailRelayConfig, WebhookConfig};
pub use credentials::{
    CredentialStore, IssueDecision, IssueLimits, MagicLinkStore, SessionStore,
};
pub use email::{
    EmailHandler, EmailOutbox, EmailPayload, HttpMailTransport, LogTransport, MailTransport,
    OutgoingEmail, PlainRenderer, RenderedEmail, TemplateRenderer,
};
pub use error::{MagicLinkError, RateScope};
pub use fanout::WebhookFanout;
pub use fleet::{ManagedWorker, WorkerFleet};
pub use magic_link::{IssuedLink, MagicLinkService};
pub use memory::{InMemoryCredentials, InMemoryWebhookRegistry};
pub use webhook::{
    sign_payload, WebhookHandler, WebhookItem, WebhookRegistry, WebhookSubscription,
    EMAIL_QUEUE, WEBHOOK_QUEUE,
};
