//! TTL Probe Service
//!
//! This crate measures how long a store with record-level expiration takes to
//! actually remove an expired record. It seeds records that expire the moment
//! they are written, observes their removal through the store's deletion feed,
//! records the latency as a metric and publishes a chart of the last 24 hours.
//!
//! # Architecture
//!
//! - [`seeder`] writes one timestamp-keyed record per tick
//! - [`detector`] turns an expiration removal into a latency sample and a chart
//! - [`consumer`] feeds removal events to the detector with bounded retries
//! - [`pipeline`] wires the loops together
//! - an Axum server exposes `/health`, the published chart and `POST /stream`,
//!   which takes change batches from an external store's stream
//!
//! # Example
//!
//! ```no_run
//! use probe::run_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_server().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
pub mod consumer;
pub mod db;
pub mod detector;
pub mod pipeline;
mod routes;
pub mod scheduler;
pub mod seeder;
mod state;

pub use config::{Config, MetricBackend};
pub use state::AppState;

use anyhow::{Context, Result};
use axum::Router;
use db::{Database, DatabaseConfig};
use pipeline::Pipeline;
use shared::clock::SystemClock;
use shared::storage::{
    ClickHouseMetricStore, FsObjectStore, InMemoryMetricStore, InMemoryObjectStore, MetricStore,
    ObjectStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Runs the probe and its snapshot server.
///
/// This function initializes the probe with configuration from environment
/// variables, starts the background loops and listens for incoming
/// connections. It handles graceful shutdown on SIGTERM/SIGINT signals.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded from environment
/// - A storage backend cannot be opened
/// - The server fails to bind to the configured address
pub async fn run_server() -> Result<()> {
    let config = Config::from_env()?;
    run_server_with_config(config).await
}

/// Runs the probe and its snapshot server with the provided configuration.
///
/// # Errors
///
/// Returns an error if:
/// - A storage backend cannot be opened
/// - The server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server_with_config(config: Config) -> Result<()> {
    let addr = config.socket_addr()?;

    tracing::info!(
        host = %config.host,
        port = %config.port,
        account_id = %config.identity.account_id,
        region = %config.identity.region,
        service_name = %config.identity.service_name,
        "TTL probe starting"
    );

    let metrics = open_metric_store(config.metric_backend, &config.database).await?;
    let objects = open_object_store(&config)?;

    let pipeline = Pipeline::new(
        config.settings.clone(),
        config.identity.clone(),
        metrics,
        objects,
        Arc::new(SystemClock),
    );
    let app = create_router(AppState::new(pipeline.publisher(), pipeline.detector()));
    let handle = pipeline.start();

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening for connections");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    handle.shutdown();
    served?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Opens the metric store for `backend`.
///
/// `ClickHouse` is pinged and its schema created before the store is returned.
///
/// # Errors
///
/// Returns an error if the database cannot be reached or the schema cannot be
/// created.
pub async fn open_metric_store(
    backend: MetricBackend,
    database: &DatabaseConfig,
) -> Result<Arc<dyn MetricStore>> {
    match backend {
        MetricBackend::Memory => Ok(InMemoryMetricStore::new_shared()),
        MetricBackend::ClickHouse => {
            let db = Database::new(database);
            db.ping().await?;
            db.ensure_schema().await?;
            tracing::info!(url = %database.url, "Using ClickHouse metric store");
            Ok(ClickHouseMetricStore::new_shared(db.client()))
        }
    }
}

fn open_object_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    match &config.snapshot_dir {
        Some(dir) => {
            let store = FsObjectStore::open(dir)
                .with_context(|| format!("Failed to open snapshot directory {}", dir.display()))?;
            tracing::info!(dir = %dir.display(), "Publishing snapshots to disk");
            Ok(Arc::new(store))
        }
        None => Ok(InMemoryObjectStore::new_shared()),
    }
}

/// Creates the main application router with all routes and middleware.
///
/// This function is public to allow testing the router without starting a full server.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::snapshot_routes(state.clone()))
        .merge(routes::stream_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_endpoint_returns_json() {
        let app = create_router(AppState::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok());
        assert!(content_type.is_some_and(|ct| ct.contains("application/json")));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = create_router(AppState::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/other.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_open_object_store_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            snapshot_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };

        let store = open_object_store(&config).unwrap();
        store.put_object("ttl-latency.png", b"x", "image/png").unwrap();

        assert!(dir.path().join("ttl-latency.png").exists());
    }

    #[tokio::test]
    async fn test_open_in_memory_metric_store() {
        let store = open_metric_store(MetricBackend::Memory, &DatabaseConfig::default())
            .await
            .unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }
}
