use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

/// Which table a credential lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// OAuth session created after a successful provider login.
    Session,
    /// Single-use passwordless login token.
    MagicLink,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::MagicLink => f.write_str("magic_link"),
        }
    }
}

/// Shared shape of OAuth sessions and magic-link tokens.
///
/// A credential past `expires_at` is never usable for authentication, even
/// while it still exists in storage; the cleanup workers delete it later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringCredential {
    /// Session id, or the hex SHA-256 of a magic-link token.
    pub id: String,
    pub tenant_id: TenantId,
    pub kind: CredentialKind,
    /// Subject the credential authenticates (user subject or email).
    pub subject: String,
    pub expires_at: DateTime<Utc>,
    /// Magic links are single use. Always `false` for sessions.
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl ExpiringCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credential(now: DateTime<Utc>, ttl_secs: i64) -> ExpiringCredential {
        ExpiringCredential {
            id: "s-1".into(),
            tenant_id: TenantId::new("acme").unwrap(),
            kind: CredentialKind::Session,
            subject: "alice@co".into(),
            expires_at: now + Duration::seconds(ttl_secs),
            used: false,
            created_at: now,
        }
    }

    #[test]
    fn expired_credential_is_not_usable() {
        let now = Utc::now();
        let c = credential(now, 60);
        assert!(c.is_usable(now));
        assert!(!c.is_usable(now + Duration::seconds(60)));
        assert!(c.is_expired(now + Duration::seconds(61)));
    }

    #[test]
    fn used_credential_is_not_usable() {
        let now = Utc::now();
        let mut c = credential(now, 600);
        c.kind = CredentialKind::MagicLink;
        c.used = true;
        assert!(!c.is_usable(now));
    }
}
