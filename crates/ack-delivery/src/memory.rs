use std::collections::BTreeSet;
use std::sync::{Mutex, RwLock};

use ack_types::{CredentialKind, ExpiringCredential, TenantId};
use ack_worker::WorkerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::credentials::{
    CredentialStore, IssueDecision, IssueLimits, MagicLinkStore, SessionStore,
};
use crate::error::RateScope;
use crate::webhook::{WebhookRegistry, WebhookSubscription};

/// Subscriptions held in memory.
#[derive(Debug, Default)]
pub struct InMemoryWebhookRegistry {
    subscriptions: RwLock<Vec<WebhookSubscription>>,
}

impl InMemoryWebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by `(tenant, id)`.
    pub fn add(&self, subscription: WebhookSubscription) {
        let mut subs = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        subs.retain(|s| !(s.tenant_id == subscription.tenant_id && s.id == subscription.id));
        subs.push(subscription);
    }

    pub fn set_active(&self, tenant: &TenantId, id: &str, active: bool) -> bool {
        let mut subs = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        match subs.iter_mut().find(|s| &s.tenant_id == tenant && s.id == id) {
            Some(s) => {
                s.active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl WebhookRegistry for InMemoryWebhookRegistry {
    async fn get(
        &self,
        tenant: &TenantId,
        subscription_id: &str,
    ) -> Result<Option<WebhookSubscription>, WorkerError> {
        let subs = self
            .subscriptions
            .read()
            .map_err(|_| WorkerError::Storage("registry lock poisoned".into()))?;
        Ok(subs
            .iter()
            .find(|s| &s.tenant_id == tenant && s.id == subscription_id)
            .cloned())
    }

    async fn subscribers(
        &self,
        tenant: &TenantId,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, WorkerError> {
        let subs = self
            .subscriptions
            .read()
            .map_err(|_| WorkerError::Storage("registry lock poisoned".into()))?;
        Ok(subs
            .iter()
            .filter(|s| &s.tenant_id == tenant && s.accepts(event_type))
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
struct Attempt {
    tenant_id: TenantId,
    email: String,
    ip: String,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CredentialState {
    sessions: Vec<ExpiringCredential>,
    links: Vec<ExpiringCredential>,
    attempts: Vec<Attempt>,
}

impl CredentialState {
    fn rows(&mut self, kind: CredentialKind) -> &mut Vec<ExpiringCredential> {
        match kind {
            CredentialKind::Session => &mut self.sessions,
            CredentialKind::MagicLink => &mut self.links,
        }
    }
}

/// Sessions, magic-link tokens and issuance attempts held in memory.
///
/// One mutex guards everything, which makes the limit check and the attempt
/// insert of [`MagicLinkStore::issue_within_limits`] atomic.
#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    state: Mutex<CredentialState>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored sessions, expired ones included.
    pub fn session_count(&self) -> usize {
        self.state.lock().map(|s| s.sessions.len()).unwrap_or_default()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().map(|s| s.attempts.len()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CredentialState>, WorkerError> {
        self.state
            .lock()
            .map_err(|_| WorkerError::Storage("credential lock poisoned".into()))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentials {
    async fn tenants(&self, kind: CredentialKind) -> Result<Vec<TenantId>, WorkerError> {
        let mut state = self.lock()?;
        let mut tenants: BTreeSet<TenantId> =
            state.rows(kind).iter().map(|c| c.tenant_id.clone()).collect();
        if kind == CredentialKind::MagicLink {
            tenants.extend(state.attempts.iter().map(|a| a.tenant_id.clone()));
        }
        Ok(tenants.into_iter().collect())
    }

    async fn delete_expired(
        &self,
        tenant: &TenantId,
        kind: CredentialKind,
        now: DateTime<Utc>,
    ) -> Result<u64, WorkerError> {
        let mut state = self.lock()?;
        let rows = state.rows(kind);
        let before = rows.len();
        rows.retain(|c| !(&c.tenant_id == tenant && c.is_expired(now)));
        Ok((before - rows.len()) as u64)
    }
}

#[async_trait]
impl SessionStore for InMemoryCredentials {
    async fn insert_session(&self, session: &ExpiringCredential) -> Result<(), WorkerError> {
        let mut state = self.lock()?;
        state
            .sessions
            .retain(|s| !(s.tenant_id == session.tenant_id && s.id == session.id));
        state.sessions.push(session.clone());
        Ok(())
    }

    async fn get_valid(
        &self,
        tenant: &TenantId,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiringCredential>, WorkerError> {
        let state = self.lock()?;
        Ok(state
            .sessions
            .iter()
            .find(|s| &s.tenant_id == tenant && s.id == id && s.is_usable(now))
            .cloned())
    }
}

#[async_trait]
impl MagicLinkStore for InMemoryCredentials {
    async fn issue_within_limits(
        &self,
        token: &ExpiringCredential,
        ip: &str,
        limits: &IssueLimits,
        now: DateTime<Utc>,
    ) -> Result<IssueDecision, WorkerError> {
        let mut state = self.lock()?;
        let recent = state
            .attempts
            .iter()
            .filter(|a| a.tenant_id == token.tenant_id && a.at > limits.window_start);
        let (by_email, by_ip) = recent.fold((0u32, 0u32), |(e, i), a| {
            (
                e + u32::from(a.email == token.subject),
                i + u32::from(a.ip == ip),
            )
        });
        if by_email >= limits.per_email {
            return Ok(IssueDecision::Limited(RateScope::Email));
        }
        if by_ip >= limits.per_ip {
            return Ok(IssueDecision::Limited(RateScope::Ip));
        }

        state.attempts.push(Attempt {
            tenant_id: token.tenant_id.clone(),
            email: token.subject.clone(),
            ip: ip.to_string(),
            at: now,
        });
        state.links.push(token.clone());
        Ok(IssueDecision::Issued)
    }

    async fn consume(
        &self,
        tenant: &TenantId,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiringCredential>, WorkerError> {
        let mut state = self.lock()?;
        let Some(link) = state
            .links
            .iter_mut()
            .find(|l| &l.tenant_id == tenant && l.id == token_hash && l.is_usable(now))
        else {
            return Ok(None);
        };
        link.used = true;
        Ok(Some(link.clone()))
    }

    async fn prune_attempts(
        &self,
        tenant: &TenantId,
        before: DateTime<Utc>,
    ) -> Result<u64, WorkerError> {
        let mut state = self.lock()?;
        let count = state.attempts.len();
        state
            .attempts
            .retain(|a| !(&a.tenant_id == tenant && a.at <= before));
        Ok((count - state.attempts.len()) as u64)
    }
}
