//! Application state module.
//!
//! Defines the shared application state that is passed to route handlers.

use crate::detector::ExpirationDetector;
use shared::chart::MetricStoreRenderer;
use shared::clock::SystemClock;
use shared::config::ExecutionIdentity;
use shared::storage::{InMemoryMetricStore, InMemoryObjectStore, SnapshotPublisher};
use std::sync::Arc;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Reads back the published latency chart.
    snapshots: SnapshotPublisher,
    /// Handles change batches pushed to the ingest route.
    detector: Arc<ExpirationDetector>,
}

impl AppState {
    /// Creates a new application state.
    ///
    /// `snapshots` should read the same object store `detector` publishes to.
    #[must_use]
    pub fn new(snapshots: SnapshotPublisher, detector: Arc<ExpirationDetector>) -> Self {
        Self {
            snapshots,
            detector,
        }
    }

    /// Creates a new application state backed by empty in-memory stores.
    ///
    /// This is useful for development and testing.
    #[must_use]
    pub fn with_in_memory_store() -> Self {
        let metrics = InMemoryMetricStore::new_shared();
        let snapshots = SnapshotPublisher::new(InMemoryObjectStore::new_shared());
        let detector = ExpirationDetector::new(
            metrics.clone(),
            Arc::new(MetricStoreRenderer::new(metrics)),
            snapshots.clone(),
            ExecutionIdentity::default(),
            Arc::new(SystemClock),
        );
        Self::new(snapshots, Arc::new(detector))
    }

    /// Returns the snapshot publisher.
    #[must_use]
    pub fn snapshots(&self) -> &SnapshotPublisher {
        &self.snapshots
    }

    /// Returns the expiration detector.
    #[must_use]
    pub fn detector(&self) -> &ExpirationDetector {
        &self.detector
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::with_in_memory_store()
    }
}
