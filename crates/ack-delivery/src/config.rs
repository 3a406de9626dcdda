use std::time::Duration;

use ack_worker::{WorkerConfig, WorkerOverrides};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    #[serde(flatten)]
    pub overrides: WorkerOverrides,
    /// Upper bound on one outbound call, connect included.
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            overrides: WorkerOverrides::default(),
            request_timeout_secs: 10,
            user_agent: concat!("ackchain-webhooks/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl WebhookConfig {
    pub fn worker(&self) -> WorkerConfig {
        self.overrides.apply(WorkerConfig::webhook_defaults())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// HTTP mail relay endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRelayConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    #[serde(flatten)]
    pub overrides: WorkerOverrides,
    pub from: String,
    /// Without a relay, emails are only logged.
    pub relay: Option<MailRelayConfig>,
    pub request_timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            overrides: WorkerOverrides::default(),
            from: "no-reply@ackchain.local".to_string(),
            relay: None,
            request_timeout_secs: 15,
        }
    }
}

impl EmailConfig {
    pub fn worker(&self) -> WorkerConfig {
        self.overrides.apply(WorkerConfig::email_defaults())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Session cleanup schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub sweep_interval_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
            shutdown_grace_secs: 30,
        }
    }
}

impl CleanupConfig {
    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            shutdown_grace_secs: self.shutdown_grace_secs,
            ..WorkerConfig::sweeper(self.sweep_interval_secs)
        }
    }
}

/// Magic-link issuance limits and cleanup schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagicLinkConfig {
    /// Links issued per email address within `window_secs`.
    pub per_email: u32,
    /// Links issued per client IP within `window_secs`.
    pub per_ip: u32,
    pub window_secs: u64,
    pub token_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for MagicLinkConfig {
    fn default() -> Self {
        Self {
            per_email: 3,
            per_ip: 10,
            window_secs: 3600,
            token_ttl_secs: 900,
            sweep_interval_secs: 3600,
        }
    }
}

impl MagicLinkConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.window_secs).unwrap_or(i64::MAX / 1000))
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.token_ttl_secs).unwrap_or(i64::MAX / 1000))
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig::sweeper(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let webhook = WebhookConfig::default();
        assert_eq!(webhook.worker().batch_size, 50);
        assert_eq!(webhook.request_timeout(), Duration::from_secs(10));

        let email = EmailConfig::default();
        assert_eq!(email.worker().max_attempts, 5);
        assert!(email.relay.is_none());

        let links = MagicLinkConfig::default();
        assert_eq!((links.per_email, links.per_ip), (3, 10));
        assert_eq!(links.window(), chrono::Duration::hours(1));
        assert_eq!(links.token_ttl(), chrono::Duration::minutes(15));

        assert_eq!(CleanupConfig::default().worker().poll_interval_secs, 3600);
    }

    #[test]
    fn flattened_worker_fields() {
        let config: WebhookConfig =
            serde_json::from_str(r#"{"batch_size": 5, "request_timeout_secs": 3}"#).unwrap();
        assert_eq!(config.worker().batch_size, 5);
        assert_eq!(config.worker().max_attempts, 8);
        assert_eq!(config.request_timeout_secs, 3);

        let email: EmailConfig = serde_json::from_str(r#"{"max_attempts": 2}"#).unwrap();
        assert_eq!(email.worker().max_attempts, 2);
        assert_eq!(email.worker().batch_size, 20);
    }
}
