use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

/// Worker configuration as it appears in the config file.
///
/// Durations are whole seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub batch_size: u32,
    pub poll_interval_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    /// Handler invocations before an item is dead-lettered.
    pub max_attempts: u32,
    pub shutdown_grace_secs: u64,
    /// Tenants processed at the same time within one tick.
    pub tenant_concurrency: usize,
    pub tenant_timeout_secs: u64,
    /// In-flight claims older than this are released back to pending.
    pub visibility_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::webhook_defaults()
    }
}

impl WorkerConfig {
    pub fn webhook_defaults() -> Self {
        Self {
            batch_size: 50,
            poll_interval_secs: 5,
            backoff_base_secs: 30,
            backoff_cap_secs: 3600,
            max_attempts: 8,
            shutdown_grace_secs: 30,
            tenant_concurrency: 8,
            tenant_timeout_secs: 120,
            visibility_timeout_secs: 600,
        }
    }

    pub fn email_defaults() -> Self {
        Self {
            batch_size: 20,
            poll_interval_secs: 10,
            backoff_base_secs: 60,
            max_attempts: 5,
            ..Self::webhook_defaults()
        }
    }

    /// Settings for a periodic sweeper that runs every `interval_secs`.
    pub fn sweeper(interval_secs: u64) -> Self {
        Self {
            poll_interval_secs: interval_secs,
            ..Self::webhook_defaults()
        }
    }

    pub fn engine(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            tenant_concurrency: self.tenant_concurrency.max(1),
            tenant_timeout: Duration::from_secs(self.tenant_timeout_secs.max(1)),
        }
    }

    pub fn queue(&self) -> QueueSettings {
        QueueSettings {
            batch_size: self.batch_size.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff: BackoffPolicy::new(
                Duration::from_secs(self.backoff_base_secs),
                Duration::from_secs(self.backoff_cap_secs),
            ),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            tenant_budget: self.engine().tenant_timeout / 2,
        }
    }
}

/// Per-queue overrides layered on that queue's own defaults.
///
/// Config files set only the fields they care about; the rest come from
/// [`WorkerConfig::webhook_defaults`], [`WorkerConfig::email_defaults`] or
/// whatever base the caller applies them to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerOverrides {
    pub batch_size: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub backoff_base_secs: Option<u64>,
    pub backoff_cap_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub shutdown_grace_secs: Option<u64>,
    pub tenant_concurrency: Option<usize>,
    pub tenant_timeout_secs: Option<u64>,
    pub visibility_timeout_secs: Option<u64>,
}

impl WorkerOverrides {
    pub fn apply(&self, base: WorkerConfig) -> WorkerConfig {
        WorkerConfig {
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            poll_interval_secs: self.poll_interval_secs.unwrap_or(base.poll_interval_secs),
            backoff_base_secs: self.backoff_base_secs.unwrap_or(base.backoff_base_secs),
            backoff_cap_secs: self.backoff_cap_secs.unwrap_or(base.backoff_cap_secs),
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            shutdown_grace_secs: self.shutdown_grace_secs.unwrap_or(base.shutdown_grace_secs),
            tenant_concurrency: self.tenant_concurrency.unwrap_or(base.tenant_concurrency),
            tenant_timeout_secs: self.tenant_timeout_secs.unwrap_or(base.tenant_timeout_secs),
            visibility_timeout_secs: self
                .visibility_timeout_secs
                .unwrap_or(base.visibility_timeout_secs),
        }
    }
}

/// Lifecycle and scheduling settings of one [`crate::WorkerEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub tenant_concurrency: usize,
    pub tenant_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        WorkerConfig::default().engine()
    }
}

/// Per-item policy of a [`crate::QueueJob`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueSettings {
    pub batch_size: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub visibility_timeout: Duration,
    /// No new item of a claimed batch is started once a tenant run has
    /// spent this long; the rest go back to pending. Half the tenant
    /// timeout, so the last item started still has time to finish.
    pub tenant_budget: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        WorkerConfig::default().queue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_and_email_defaults() {
        let webhook = WorkerConfig::webhook_defaults();
        assert_eq!(webhook.batch_size, 50);
        assert_eq!(webhook.max_attempts, 8);
        assert_eq!(webhook.engine().poll_interval, Duration::from_secs(5));
        assert_eq!(webhook.engine().shutdown_grace, Duration::from_secs(30));

        let email = WorkerConfig::email_defaults();
        assert_eq!(email.batch_size, 20);
        assert_eq!(email.max_attempts, 5);
        assert_eq!(email.queue().backoff.base(), Duration::from_secs(60));
        assert_eq!(email.queue().backoff.cap(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: WorkerConfig = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.batch_size, 50);
    }

    #[test]
    fn overrides_keep_the_base_defaults() {
        let overrides: WorkerOverrides =
            serde_json::from_str(r#"{"batch_size": 5}"#).unwrap();
        let email = overrides.apply(WorkerConfig::email_defaults());
        assert_eq!(email.batch_size, 5);
        assert_eq!(email.max_attempts, 5);
        assert_eq!(email.backoff_base_secs, 60);
        assert_eq!(WorkerOverrides::default().apply(WorkerConfig::webhook_defaults()), WorkerConfig::webhook_defaults());
    }

    #[test]
    fn zero_values_are_clamped() {
        let config = WorkerConfig {
            batch_size: 0,
            poll_interval_secs: 0,
            tenant_concurrency: 0,
            ..WorkerConfig::default()
        };
        assert_eq!(config.queue().batch_size, 1);
        assert_eq!(config.engine().poll_interval, Duration::from_secs(1));
        assert_eq!(config.engine().tenant_concurrency, 1);
    }

    #[test]
    fn batch_budget_fits_inside_the_tenant_timeout() {
        let webhook = WorkerConfig::webhook_defaults();
        assert_eq!(webhook.queue().tenant_budget, Duration::from_secs(60));
        assert!(webhook.queue().tenant_budget < webhook.engine().tenant_timeout);

        let tiny = WorkerConfig {
            tenant_timeout_secs: 0,
            ..WorkerConfig::default()
        };
        assert_eq!(tiny.queue().tenant_budget, Duration::from_millis(500));
    }
}
