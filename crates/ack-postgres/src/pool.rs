use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/ackchain".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Open the pool shared by the ledger and every worker.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs.max(1)))
        .connect(&config.url)
        .await?;
    info!(max_connections = config.max_connections, "database pool ready");
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: DatabaseConfig =
            serde_json::from_str(r#"{"url": "postgres://db.internal/ack"}"#).unwrap();
        assert_eq!(config.url, "postgres://db.internal/ack");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout_secs, 5);
    }
}
