use std::sync::Arc;

use ack_types::{Clock, CredentialKind, ExpiringCredential, SystemClock, TenantId};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{info, warn, Span};

use crate::config::MagicLinkConfig;
use crate::credentials::{IssueDecision, IssueLimits, MagicLinkStore};
use crate::error::MagicLinkError;

/// A freshly issued token. Only its hash is stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedLink {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Hex SHA-256 of a raw token, the id it is stored under.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Issues and consumes single-use magic-link tokens under per-email and
/// per-IP sliding-window limits.
pub struct MagicLinkService<S> {
    store: Arc<S>,
    config: MagicLinkConfig,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl<S: MagicLinkStore> MagicLinkService<S> {
    pub fn new(store: Arc<S>, config: MagicLinkConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            span: Span::none(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &MagicLinkConfig {
        &self.config
    }

    pub async fn issue(
        &self,
        tenant_id: &TenantId,
        email: &str,
        ip: &str,
    ) -> Result<IssuedLink, MagicLinkError> {
        let email = email.trim().to_ascii_lowercase();
        if email.len() < 3 || !email.contains('@') {
            return Err(MagicLinkError::InvalidEmail(email));
        }

        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.config.token_ttl())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let credential = ExpiringCredential {
            id: token_hash(&token),
            tenant_id: tenant_id.clone(),
            kind: CredentialKind::MagicLink,
            subject: email.clone(),
            expires_at,
            used: false,
            created_at: now,
        };
        let limits = IssueLimits {
            per_email: self.config.per_email,
            per_ip: self.config.per_ip,
            window_start: now
                .checked_sub_signed(self.config.window())
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        };

        match self
            .store
            .issue_within_limits(&credential, ip, &limits, now)
            .await?
        {
            IssueDecision::Issued => {
                info!(parent: &self.span, tenant = %tenant_id, "magic link issued");
                Ok(IssuedLink { token, expires_at })
            }
            IssueDecision::Limited(scope) => {
                warn!(parent: &self.span, tenant = %tenant_id, %scope, "magic link rate limited");
                Err(MagicLinkError::RateLimited { scope })
            }
        }
    }

    /// Redeem a token once. Unknown, used and expired tokens are all
    /// [`MagicLinkError::InvalidToken`].
    pub async fn consume(
        &self,
        tenant_id: &TenantId,
        token: &str,
    ) -> Result<ExpiringCredential, MagicLinkError> {
        self.store
            .consume(tenant_id, &token_hash(token), self.clock.now())
            .await?
            .ok_or(MagicLinkError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ack_types::ManualClock;

    use super::*;
    use crate::error::RateScope;
    use crate::memory::InMemoryCredentials;

    fn service(clock: Arc<ManualClock>) -> MagicLinkService<InMemoryCredentials> {
        MagicLinkService::new(
            Arc::new(InMemoryCredentials::new()),
            MagicLinkConfig {
                per_email: 3,
                per_ip: 5,
                window_secs: 3600,
                token_ttl_secs: 900,
                sweep_interval_secs: 3600,
            },
        )
        .with_clock(clock)
    }

    fn acme() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    #[tokio::test]
    async fn per_email_limit_and_window_slide() {
        let clock = Arc::new(ManualClock::default());
        let svc = service(clock.clone());

        for _ in 0..3 {
            svc.issue(&acme(), "Alice@Co.example", "10.0.0.1").await.unwrap();
            clock.advance(Duration::from_secs(60));
        }
        let err = svc.issue(&acme(), "alice@co.example", "10.0.0.2").await.unwrap_err();
        assert_eq!(err, MagicLinkError::RateLimited { scope: RateScope::Email });

        // Another tenant has its own budget.
        svc.issue(&TenantId::new("globex").unwrap(), "alice@co.example", "10.0.0.3")
            .await
            .unwrap();

        // The first attempt leaves the window exactly one hour after it was made.
        clock.set(ManualClock::default().now() + chrono::Duration::hours(1));
        svc.issue(&acme(), "alice@co.example", "10.0.0.2").await.unwrap();
        let err = svc.issue(&acme(), "alice@co.example", "10.0.0.2").await.unwrap_err();
        assert_eq!(err, MagicLinkError::RateLimited { scope: RateScope::Email });
    }

    #[tokio::test]
    async fn per_ip_limit() {
        let clock = Arc::new(ManualClock::default());
        let svc = service(clock);
        for i in 0..5 {
            svc.issue(&acme(), &format!("user{i}@co.example"), "10.9.9.9")
                .await
                .unwrap();
        }
        let err = svc.issue(&acme(), "user9@co.example", "10.9.9.9").await.unwrap_err();
        assert_eq!(err, MagicLinkError::RateLimited { scope: RateScope::Ip });
        svc.issue(&acme(), "user9@co.example", "10.9.9.10").await.unwrap();
    }

    #[tokio::test]
    async fn tokens_are_single_use_and_expire() {
        let clock = Arc::new(ManualClock::default());
        let svc = service(clock.clone());

        let link = svc.issue(&acme(), "bob@co.example", "10.0.0.1").await.unwrap();
        assert_eq!(link.token.len(), 64);
        let credential = svc.consume(&acme(), &link.token).await.unwrap();
        assert_eq!(credential.subject, "bob@co.example");
        assert!(credential.used);
        assert_eq!(svc.consume(&acme(), &link.token).await.unwrap_err(), MagicLinkError::InvalidToken);

        let late = svc.issue(&acme(), "bob@co.example", "10.0.0.1").await.unwrap();
        assert_eq!(
            svc.consume(&TenantId::new("globex").unwrap(), &late.token).await.unwrap_err(),
            MagicLinkError::InvalidToken
        );
        clock.advance(Duration::from_secs(901));
        assert_eq!(svc.consume(&acme(), &late.token).await.unwrap_err(), MagicLinkError::InvalidToken);
        assert_eq!(svc.consume(&acme(), "not-a-token").await.unwrap_err(), MagicLinkError::InvalidToken);
    }

    #[tokio::test]
    async fn rejects_malformed_email() {
        let svc = service(Arc::new(ManualClock::default()));
        assert!(matches!(
            svc.issue(&acme(), "  ", "10.0.0.1").await,
            Err(MagicLinkError::InvalidEmail(_))
        ));
    }

    #[test]
    fn stored_id_is_token_digest() {
        assert_eq!(
            token_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
