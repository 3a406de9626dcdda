use std::path::{Path, PathBuf};

use ack_delivery::{CleanupConfig, EmailConfig, MagicLinkConfig, WebhookConfig};
use ack_ledger::SigningConfig;
use ack_postgres::DatabaseConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Where the process signing key lives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// File holding the hex-encoded Ed25519 secret key.
    pub key_file: Option<PathBuf>,
}

/// Contents of `ackd.toml`. Every section is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckdConfig {
    pub database: DatabaseConfig,
    pub signing: KeyConfig,
    pub ledger: SigningConfig,
    pub webhook: WebhookConfig,
    pub email: EmailConfig,
    pub sessions: CleanupConfig,
    pub magic_links: MagicLinkConfig,
}

impl AckdConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
