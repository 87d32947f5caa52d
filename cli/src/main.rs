//! TTL Latency CLI
//!
//! Command-line companion of the TTL probe: prints the record a probe tick
//! writes, replays a captured change-event batch through the detector, shows
//! the chart request for an identity and checks a running probe's health.
//!
//! # Usage
//!
//! ```bash
//! ttl-latency --help
//! ttl-latency seed
//! ttl-latency detect event.json --now 2024-01-01T00:00:05Z --out-dir ./charts
//! ttl-latency detect event.json --metric-backend clickhouse
//! ttl-latency chart-spec --function-arn arn:aws:lambda:us-east-1:123456789012:function:probe
//! ttl-latency health
//! ```

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use probe::db::DatabaseConfig;
use probe::detector::ExpirationDetector;
use probe::MetricBackend;
use serde_json::json;
use shared::chart::{ChartSpec, MetricStoreRenderer};
use shared::clock::{Clock, FixedClock, SystemClock};
use shared::config::ExecutionIdentity;
use shared::models::ProbeRecord;
use shared::storage::{FsObjectStore, MetricStore, SnapshotPublisher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// TTL Latency CLI - inspect and exercise the TTL probe
#[derive(Parser)]
#[command(name = "ttl-latency")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Probe server URL
    #[arg(
        short,
        long,
        env = "TTL_PROBE_URL",
        default_value = "http://localhost:8080"
    )]
    api_url: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the probe record a tick would write
    Seed {
        /// Creation time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Run a change-event batch file through the detector
    Detect {
        /// JSON file holding a one-record batch
        event: PathBuf,
        /// Detection time (RFC 3339); defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
        /// Directory the chart is published to
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Where samples accumulate: memory (this run only) or clickhouse
        #[arg(long, env = "TTL_PROBE_METRIC_BACKEND", default_value = "memory")]
        metric_backend: MetricBackend,
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Print the chart request for an identity
    ChartSpec {
        /// Chart end time (RFC 3339); defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Check probe server health
    Health,
}

#[derive(Args, Debug, Clone, Default)]
struct IdentityArgs {
    /// ARN the identity is resolved from
    #[arg(long, env = "TTL_PROBE_FUNCTION_ARN")]
    function_arn: Option<String>,
    /// Account identifier
    #[arg(long, env = "TTL_PROBE_ACCOUNT_ID")]
    account_id: Option<String>,
    /// Region name
    #[arg(long, env = "TTL_PROBE_REGION")]
    region: Option<String>,
    /// Service name
    #[arg(long, env = "TTL_PROBE_SERVICE_NAME")]
    service_name: Option<String>,
}

impl IdentityArgs {
    fn resolve(self) -> Result<ExecutionIdentity> {
        if let Some(arn) = self.function_arn {
            return Ok(ExecutionIdentity::from_arn(&arn)?);
        }
        let fallback = ExecutionIdentity::default();
        Ok(ExecutionIdentity::new(
            self.account_id.unwrap_or(fallback.account_id),
            self.region.unwrap_or(fallback.region),
            self.service_name.unwrap_or(fallback.service_name),
        )?)
    }
}

fn clock_at(now: Option<DateTime<Utc>>) -> Arc<dyn Clock> {
    match now {
        Some(now) => Arc::new(FixedClock::new(now)),
        None => Arc::new(SystemClock),
    }
}

fn seed(at: Option<DateTime<Utc>>) -> serde_json::Value {
    ProbeRecord::at(at.unwrap_or_else(Utc::now)).to_item()
}

async fn detect(
    event: &Path,
    now: Option<DateTime<Utc>>,
    out_dir: PathBuf,
    metrics: Arc<dyn MetricStore>,
    identity: ExecutionIdentity,
) -> Result<serde_json::Value> {
    let payload = tokio::fs::read_to_string(event)
        .await
        .with_context(|| format!("Failed to read {}", event.display()))?;

    let objects = Arc::new(
        FsObjectStore::open(&out_dir)
            .with_context(|| format!("Failed to open {}", out_dir.display()))?,
    );
    let detector = ExpirationDetector::new(
        metrics.clone(),
        Arc::new(MetricStoreRenderer::new(metrics)),
        SnapshotPublisher::new(objects),
        identity,
        clock_at(now),
    );

    let detection = detector.handle_batch(&payload)?;
    Ok(json!({
        "creation_key": detection.sample.creation_key,
        "detected_at": detection.sample.detected_at,
        "latency_ms": detection.sample.latency_ms,
        "anomalous": detection.sample.anomalous,
        "snapshot": out_dir.join(&detection.snapshot.key),
        "size": detection.snapshot.size,
    }))
}

async fn health(api_url: &str) -> Result<serde_json::Value> {
    let url = format!("{}/health", api_url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to connect to {url}"))?
        .error_for_status()
        .context("Health check failed")?;

    response.json().await.context("Health response is not JSON")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let output = match cli.command {
        Some(Commands::Seed { at }) => seed(at),
        Some(Commands::Detect {
            event,
            now,
            out_dir,
            metric_backend,
            identity,
        }) => {
            let identity = identity.resolve()?;
            let metrics =
                probe::open_metric_store(metric_backend, &DatabaseConfig::from_env()).await?;
            detect(&event, now, out_dir, metrics, identity).await?
        }
        Some(Commands::ChartSpec { now, identity }) => {
            ChartSpec::ttl_latency(&identity.resolve()?, now.unwrap_or_else(Utc::now))
                .to_widget_json()
        }
        Some(Commands::Health) => {
            tracing::debug!(url = %cli.api_url, "Checking probe health");
            health(&cli.api_url).await?
        }
        None => {
            println!("TTL Latency CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
