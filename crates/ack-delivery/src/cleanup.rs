use std::sync::Arc;

use ack_types::{CredentialKind, TenantId};
use ack_worker::{Sweeper, WorkerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::credentials::{CredentialStore, MagicLinkStore};

/// Deletes expired OAuth sessions.
pub struct SessionCleanup<S> {
    store: Arc<S>,
}

impl<S: CredentialStore> SessionCleanup<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: CredentialStore> Sweeper for SessionCleanup<S> {
    fn name(&self) -> &str {
        "session-cleanup"
    }

    async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError> {
        self.store.tenants(CredentialKind::Session).await
    }

    async fn sweep(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<u64, WorkerError> {
        self.store
            .delete_expired(tenant, CredentialKind::Session, now)
            .await
    }
}

/// Deletes expired magic-link tokens and issuance attempts that fell out of
/// the rate-limit window.
pub struct MagicLinkCleanup<S> {
    store: Arc<S>,
    window: chrono::Duration,
}

impl<S: CredentialStore + MagicLinkStore> MagicLinkCleanup<S> {
    pub fn new(store: Arc<S>, window: chrono::Duration) -> Self {
        Self { store, window }
    }
}

#[async_trait]
impl<S: CredentialStore + MagicLinkStore> Sweeper for MagicLinkCleanup<S> {
    fn name(&self) -> &str {
        "magic-link-cleanup"
    }

    async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError> {
        self.store.tenants(CredentialKind::MagicLink).await
    }

    async fn sweep(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<u64, WorkerError> {
        let tokens = self
            .store
            .delete_expired(tenant, CredentialKind::MagicLink, now)
            .await?;
        let attempts = match now.checked_sub_signed(self.window) {
            Some(cutoff) => self.store.prune_attempts(tenant, cutoff).await?,
            None => 0,
        };
        debug!(tenant = %tenant, tokens, attempts, "magic-link sweep");
        Ok(tokens + attempts)
    }
}
