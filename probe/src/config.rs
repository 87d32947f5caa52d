//! Server configuration module.
//!
//! Handles loading configuration from environment variables with sensible defaults.

use crate::db::DatabaseConfig;
use anyhow::{bail, Context, Result};
use shared::config::{ExecutionIdentity, ProbeSettings};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// Where latency samples are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetricBackend {
    /// Process memory; samples are lost on restart.
    #[default]
    Memory,
    /// `ClickHouse`, configured through the `TTL_PROBE_DB_*` variables.
    ClickHouse,
}

impl FromStr for MetricBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "clickhouse" => Ok(Self::ClickHouse),
            other => bail!("Unknown metric backend '{other}', expected 'memory' or 'clickhouse'"),
        }
    }
}

/// Probe configuration.
///
/// Configuration values can be set via environment variables:
/// - `TTL_PROBE_HOST`: The host address to bind to (default: "0.0.0.0")
/// - `TTL_PROBE_PORT`: The port to listen on (default: 8080)
/// - `TTL_PROBE_INTERVAL_SECS`: Seconds between seeded records (default: 60)
/// - `TTL_PROBE_SWEEP_INTERVAL_SECS`: Seconds between expiration sweeps (default: 15)
/// - `TTL_PROBE_RETRY_ATTEMPTS`: Retries of a failed detector invocation (default: 1)
/// - `TTL_PROBE_SNAPSHOT_DIR`: Directory snapshots are written to (default: in memory)
/// - `TTL_PROBE_METRIC_BACKEND`: `memory` or `clickhouse` (default: memory)
/// - `TTL_PROBE_FUNCTION_ARN`: ARN the identity is resolved from
/// - `TTL_PROBE_ACCOUNT_ID`, `TTL_PROBE_REGION`, `TTL_PROBE_SERVICE_NAME`:
///   identity parts used when no ARN is set
#[derive(Debug, Clone)]
pub struct Config {
    /// The host address to bind to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
    /// Probe timing and retry settings.
    pub settings: ProbeSettings,
    /// Identity the metric and chart are scoped to.
    pub identity: ExecutionIdentity,
    /// Root of the filesystem object store, if any.
    pub snapshot_dir: Option<PathBuf>,
    /// Where latency samples go.
    pub metric_backend: MetricBackend,
    /// `ClickHouse` connection, used by [`MetricBackend::ClickHouse`].
    pub database: DatabaseConfig,
}

impl Config {
    /// Creates a new configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A numeric variable is set but cannot be parsed
    /// - The probe settings are out of range
    /// - The identity ARN is malformed or an identity part is empty
    /// - The metric backend is unknown
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
        where
            T: FromStr,
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            lookup(name)
                .map(|v| v.parse::<T>())
                .transpose()
                .with_context(|| format!("Invalid value for {name}"))
                .map(|v| v.unwrap_or(default))
        }

        let defaults = ProbeSettings::default();
        let settings = ProbeSettings::new(
            parsed(&lookup, "TTL_PROBE_INTERVAL_SECS", defaults.probe_interval_secs)?,
            parsed(&lookup, "TTL_PROBE_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            parsed(&lookup, "TTL_PROBE_RETRY_ATTEMPTS", defaults.retry_attempts)?,
        );
        settings.validate().map_err(anyhow::Error::msg)?;

        let identity = match lookup("TTL_PROBE_FUNCTION_ARN") {
            Some(arn) => ExecutionIdentity::from_arn(&arn)?,
            None => {
                let fallback = ExecutionIdentity::default();
                ExecutionIdentity::new(
                    lookup("TTL_PROBE_ACCOUNT_ID").unwrap_or(fallback.account_id),
                    lookup("TTL_PROBE_REGION")
                        .or_else(|| lookup("AWS_REGION"))
                        .unwrap_or(fallback.region),
                    lookup("TTL_PROBE_SERVICE_NAME")
                        .or_else(|| lookup("AWS_LAMBDA_FUNCTION_NAME"))
                        .unwrap_or(fallback.service_name),
                )?
            }
        };

        let metric_backend = lookup("TTL_PROBE_METRIC_BACKEND")
            .map(|v| v.parse::<MetricBackend>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            host: lookup("TTL_PROBE_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed(&lookup, "TTL_PROBE_PORT", 8080)?,
            settings,
            identity,
            snapshot_dir: lookup("TTL_PROBE_SNAPSHOT_DIR").map(PathBuf::from),
            metric_backend,
            database: DatabaseConfig::from_lookup(&lookup),
        })
    }

    /// Returns the socket address for binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid host address '{}'", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            settings: ProbeSettings::default(),
            identity: ExecutionIdentity::default(),
            snapshot_dir: None,
            metric_backend: MetricBackend::Memory,
            database: DatabaseConfig::default(),
        }
    }
}
