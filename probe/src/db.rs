//! Database connection module for `ClickHouse`.
//!
//! Used when latency samples are kept in `ClickHouse` instead of memory. The
//! module builds the client from environment variables and creates the
//! `metrics` table the [`ClickHouseMetricStore`] reads and writes.
//!
//! [`ClickHouseMetricStore`]: shared::storage::ClickHouseMetricStore

use anyhow::{Context, Result};
use clickhouse::Client;
use std::sync::Arc;

/// Schema of the table backing `ClickHouseMetricStore`.
const METRICS_TABLE_DDL: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    timestamp Int64,
    name String,
    value Float64,
    labels Map(String, String),
    unit LowCardinality(String),
    resolution UInt32
)
ENGINE = MergeTree
ORDER BY (name, timestamp)
";

/// Database configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `ClickHouse` database URL (e.g., <http://localhost:8123>)
    pub url: String,
    /// Database name to use
    pub database: String,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: String,
}

impl DatabaseConfig {
    /// Load database configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TTL_PROBE_DB_URL`: Database URL (default: <http://localhost:8123>)
    /// - `TTL_PROBE_DB_NAME`: Database name (default: "`ttl_probe`")
    /// - `TTL_PROBE_DB_USER`: Database user (default: "default")
    /// - `TTL_PROBE_DB_PASSWORD`: Database password (default: empty)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            url: lookup("TTL_PROBE_DB_URL").unwrap_or_else(|| "http://localhost:8123".to_string()),
            database: lookup("TTL_PROBE_DB_NAME").unwrap_or_else(|| "ttl_probe".to_string()),
            user: lookup("TTL_PROBE_DB_USER").unwrap_or_else(|| "default".to_string()),
            password: lookup("TTL_PROBE_DB_PASSWORD").unwrap_or_default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Database client wrapper.
#[derive(Clone)]
pub struct Database {
    client: Arc<Client>,
}

impl Database {
    /// Create a new database client from configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// # use probe::db::{Database, DatabaseConfig};
    /// let db = Database::new(&DatabaseConfig::default());
    /// let _client = db.client();
    /// ```
    #[must_use]
    pub fn new(config: &DatabaseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.user)
            .with_password(&config.password);

        Self {
            client: Arc::new(client),
        }
    }

    /// Get a reference to the underlying `ClickHouse` client.
    #[must_use]
    pub fn client(&self) -> Arc<Client> {
        Arc::clone(&self.client)
    }

    /// Test database connectivity by executing a simple query.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached or the query fails.
    pub async fn ping(&self) -> Result<()> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .context("Failed to ping database")?;
        Ok(())
    }

    /// Creates the `metrics` table if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.client
            .query(METRICS_TABLE_DDL)
            .execute()
            .await
            .context("Failed to create metrics table")?;
        tracing::info!("Metrics table ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::default();

        assert_eq!(config.url, "http://localhost:8123");
        assert_eq!(config.database, "ttl_probe");
        assert_eq!(config.user, "default");
        assert_eq!(config.password, "");
    }

    #[test]
    fn test_database_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TTL_PROBE_DB_URL", "http://custom:8123"),
            ("TTL_PROBE_DB_NAME", "test_db"),
            ("TTL_PROBE_DB_USER", "test_user"),
            ("TTL_PROBE_DB_PASSWORD", "test_pass"),
        ]
        .into_iter()
        .collect();

        let config = DatabaseConfig::from_lookup(|name| vars.get(name).map(ToString::to_string));

        assert_eq!(config.url, "http://custom:8123");
        assert_eq!(config.database, "test_db");
        assert_eq!(config.user, "test_user");
        assert_eq!(config.password, "test_pass");
    }

    #[test]
    fn test_database_creation() {
        let _db = Database::new(&DatabaseConfig::default());
    }

    #[test]
    fn test_schema_matches_metric_rows() {
        for column in ["timestamp Int64", "labels Map(String, String)", "resolution UInt32"] {
            assert!(METRICS_TABLE_DDL.contains(column), "missing {column}");
        }
    }

    #[tokio::test]
    #[ignore = "requires a running ClickHouse instance"]
    async fn test_database_ping() {
        let db = Database::new(&DatabaseConfig::from_env());

        assert!(db.ping().await.is_ok());
        assert!(db.ensure_schema().await.is_ok());
    }
}
