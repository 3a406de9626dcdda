use ack_delivery::{
    CredentialStore, IssueDecision, IssueLimits, MagicLinkStore, RateScope, SessionStore,
};
use ack_types::{CredentialKind, ExpiringCredential, TenantId};
use ack_worker::WorkerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::worker_error;

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: String,
    tenant_id: String,
    subject: String,
    expires_at: DateTime<Utc>,
    used: bool,
    created_at: DateTime<Utc>,
}

impl CredentialRow {
    fn into_credential(self, kind: CredentialKind) -> Result<ExpiringCredential, WorkerError> {
        Ok(ExpiringCredential {
            id: self.id,
            tenant_id: TenantId::new(self.tenant_id)?,
            kind,
            subject: self.subject,
            expires_at: self.expires_at,
            used: self.used,
            created_at: self.created_at,
        })
    }
}

fn table(kind: CredentialKind) -> &'static str {
    match kind {
        CredentialKind::Session => "sessions",
        CredentialKind::MagicLink => "magic_link_tokens",
    }
}

fn limit_reached(by_email: i64, by_ip: i64, limits: &IssueLimits) -> Option<RateScope> {
    if by_email >= i64::from(limits.per_email) {
        Some(RateScope::Email)
    } else if by_ip >= i64::from(limits.per_ip) {
        Some(RateScope::Ip)
    } else {
        None
    }
}

/// Sessions, magic-link tokens and issuance attempts.
#[derive(Clone)]
pub struct PgCredentials {
    pool: PgPool,
}

impl PgCredentials {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentials {
    async fn tenants(&self, kind: CredentialKind) -> Result<Vec<TenantId>, WorkerError> {
        let sql = match kind {
            CredentialKind::Session => "SELECT DISTINCT tenant_id FROM sessions ORDER BY tenant_id",
            CredentialKind::MagicLink => {
                "SELECT tenant_id FROM magic_link_tokens
                 UNION SELECT tenant_id FROM magic_link_attempts
                 ORDER BY tenant_id"
            }
        };
        let ids: Vec<String> = sqlx::query_scalar(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(worker_error)?;
        ids.into_iter()
            .map(|id| TenantId::new(id).map_err(WorkerError::from))
            .collect()
    }

    async fn delete_expired(
        &self,
        tenant: &TenantId,
        kind: CredentialKind,
        now: DateTime<Utc>,
    ) -> Result<u64, WorkerError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE tenant_id = $1 AND expires_at <= $2",
            table(kind)
        ))
        .bind(tenant.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(worker_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for PgCredentials {
    async fn insert_session(&self, session: &ExpiringCredential) -> Result<(), WorkerError> {
        sqlx::query(
            "INSERT INTO sessions (tenant_id, id, subject, expires_at, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (tenant_id, id) DO UPDATE SET
                subject = $3, expires_at = $4",
        )
        .bind(session.tenant_id.as_str())
        .bind(&session.id)
        .bind(&session.subject)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(worker_error)?;
        Ok(())
    }

    async fn get_valid(
        &self,
        tenant: &TenantId,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiringCredential>, WorkerError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "SELECT id, tenant_id, subject, expires_at, FALSE AS used, created_at
             FROM sessions WHERE tenant_id = $1 AND id = $2 AND expires_at > $3",
        )
        .bind(tenant.as_str())
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(worker_error)?;
        row.map(|r| r.into_credential(CredentialKind::Session))
            .transpose()
    }
}

#[async_trait]
impl MagicLinkStore for PgCredentials {
    async fn issue_within_limits(
        &self,
        token: &ExpiringCredential,
        ip: &str,
        limits: &IssueLimits,
        now: DateTime<Utc>,
    ) -> Result<IssueDecision, WorkerError> {
        let mut tx = self.pool.begin().await.map_err(worker_error)?;

        // Serializes issuance per tenant so count and insert see the same rows.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended('magic-link:' || $1, 0))")
            .bind(token.tenant_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(worker_error)?;

        let (by_email, by_ip): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*) FILTER (WHERE email = $2), COUNT(*) FILTER (WHERE ip = $3)
             FROM magic_link_attempts
             WHERE tenant_id = $1 AND attempted_at > $4",
        )
        .bind(token.tenant_id.as_str())
        .bind(&token.subject)
        .bind(ip)
        .bind(limits.window_start)
        .fetch_one(&mut *tx)
        .await
        .map_err(worker_error)?;

        if let Some(scope) = limit_reached(by_email, by_ip, limits) {
            tx.rollback().await.map_err(worker_error)?;
            return Ok(IssueDecision::Limited(scope));
        }

        sqlx::query(
            "INSERT INTO magic_link_attempts (tenant_id, email, ip, attempted_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(token.tenant_id.as_str())
        .bind(&token.subject)
        .bind(ip)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(worker_error)?;

        sqlx::query(
            "INSERT INTO magic_link_tokens (tenant_id, token_hash, email, expires_at, used, created_at)
             VALUES ($1, $2, $3, $4, FALSE, $5)",
        )
        .bind(token.tenant_id.as_str())
        .bind(&token.id)
        .bind(&token.subject)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&mut *tx)
        .await
        .map_err(worker_error)?;

        tx.commit().await.map_err(worker_error)?;
        Ok(IssueDecision::Issued)
    }

    async fn consume(
        &self,
        tenant: &TenantId,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiringCredential>, WorkerError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "UPDATE magic_link_tokens SET used = TRUE
             WHERE tenant_id = $1 AND token_hash = $2 AND NOT used AND expires_at > $3
             RETURNING token_hash AS id, tenant_id, email AS subject, expires_at, used, created_at",
        )
        .bind(tenant.as_str())
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(worker_error)?;
        row.map(|r| r.into_credential(CredentialKind::MagicLink))
            .transpose()
    }

    async fn prune_attempts(
        &self,
        tenant: &TenantId,
        before: DateTime<Utc>,
    ) -> Result<u64, WorkerError> {
        let result = sqlx::query(
            "DELETE FROM magic_link_attempts WHERE tenant_id = $1 AND attempted_at <= $2",
        )
        .bind(tenant.as_str())
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(worker_error)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> IssueLimits {
        IssueLimits {
            per_email: 3,
            per_ip: 10,
            window_start: Utc::now(),
        }
    }

    #[test]
    fn email_limit_checked_before_ip_limit() {
        assert_eq!(limit_reached(2, 9, &limits()), None);
        assert_eq!(limit_reached(3, 0, &limits()), Some(RateScope::Email));
        assert_eq!(limit_reached(3, 10, &limits()), Some(RateScope::Email));
        assert_eq!(limit_reached(0, 10, &limits()), Some(RateScope::Ip));
    }

    #[test]
    fn credential_tables() {
        assert_eq!(table(CredentialKind::Session), "sessions");
        assert_eq!(table(CredentialKind::MagicLink), "magic_link_tokens");
    }
}
