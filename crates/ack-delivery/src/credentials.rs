use ack_types::{CredentialKind, ExpiringCredential, TenantId};
use ack_worker::WorkerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RateScope;

/// Storage side of credential expiry.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Tenants holding credentials of `kind` (for magic links, also tenants
    /// with recorded issuance attempts).
    async fn tenants(&self, kind: CredentialKind) -> Result<Vec<TenantId>, WorkerError>;

    /// Delete credentials of `kind` that expired at or before `now`.
    async fn delete_expired(
        &self,
        tenant: &TenantId,
        kind: CredentialKind,
        now: DateTime<Utc>,
    ) -> Result<u64, WorkerError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &ExpiringCredential) -> Result<(), WorkerError>;

    /// The session, unless it is missing or expired at `now`. Expired rows
    /// that the sweeper has not reached yet are invisible here.
    async fn get_valid(
        &self,
        tenant: &TenantId,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiringCredential>, WorkerError>;
}

/// Sliding-window limits for one issuance request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssueLimits {
    pub per_email: u32,
    pub per_ip: u32,
    /// Attempts at or before this instant no longer count.
    pub window_start: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueDecision {
    Issued,
    Limited(RateScope),
}

#[async_trait]
pub trait MagicLinkStore: Send + Sync {
    /// Atomically check both limits and, when neither is reached, record the
    /// attempt and store `token`. Refused requests leave no trace.
    async fn issue_within_limits(
        &self,
        token: &ExpiringCredential,
        ip: &str,
        limits: &IssueLimits,
        now: DateTime<Utc>,
    ) -> Result<IssueDecision, WorkerError>;

    /// Atomically mark the token used if it is usable at `now`, returning it.
    async fn consume(
        &self,
        tenant: &TenantId,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiringCredential>, WorkerError>;

    /// Drop attempts recorded at or before `before`.
    async fn prune_attempts(
        &self,
        tenant: &TenantId,
        before: DateTime<Utc>,
    ) -> Result<u64, WorkerError>;
}
