//! Expiration detector.
//!
//! Handles one change event at a time: validates that it is an expiration
//! removal of a probe record, derives the latency between the record's
//! creation and the moment the removal is observed, emits it as a metric,
//! then re-renders the latency chart and publishes it under the fixed
//! snapshot key.

use chrono::{DateTime, Utc};
use shared::chart::{ChartRenderer, ChartSpec, RenderError, LATENCY_METRIC_NAME};
use shared::clock::Clock;
use shared::config::ExecutionIdentity;
use shared::models::{
    ChangeEvent, EventValidationError, Metric, MetricUnit, StorageResolution, StreamBatch,
};
use shared::storage::{
    MetricStore, MetricStoreError, ObjectStoreError, PublishOutcome, SnapshotPublisher,
};
use std::sync::Arc;
use thiserror::Error;

/// Label attached to samples whose creation key lies in the future.
pub const ANOMALY_LABEL: &str = "anomaly";

/// Value of [`ANOMALY_LABEL`] for negative latencies.
pub const CLOCK_SKEW: &str = "clock_skew";

/// Errors raised while handling a change event.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The event is not a usable expiration removal.
    #[error("Invalid change event: {0}")]
    Validation(#[from] EventValidationError),

    /// The latency sample could not be emitted.
    #[error("Failed to emit latency sample: {0}")]
    Metrics(MetricStoreError),

    /// The chart could not be rendered.
    #[error("Failed to render latency chart: {0}")]
    Render(#[from] RenderError),

    /// The rendered chart could not be published.
    #[error("Failed to publish latency chart: {0}")]
    Publish(#[from] ObjectStoreError),
}

/// One observed expiration latency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySample {
    /// Key of the expired record.
    pub creation_key: String,
    /// Creation time parsed from the key.
    pub created_at: DateTime<Utc>,
    /// Time the removal was observed.
    pub detected_at: DateTime<Utc>,
    /// `detected_at - created_at` in milliseconds. May be negative.
    pub latency_ms: i64,
    /// True when the creation key lies after the detection time.
    pub anomalous: bool,
}

impl LatencySample {
    /// Computes the sample for a record created at `created_at` and seen
    /// removed at `detected_at`.
    #[must_use]
    pub fn between(
        creation_key: impl Into<String>,
        created_at: DateTime<Utc>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let latency_ms = (detected_at - created_at).num_milliseconds();
        Self {
            creation_key: creation_key.into(),
            created_at,
            detected_at,
            latency_ms,
            anomalous: latency_ms < 0,
        }
    }

    /// Converts the sample into the `ttl-latency` metric scoped to `identity`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_metric(&self, identity: &ExecutionIdentity) -> Metric {
        let metric = Metric::gauge(LATENCY_METRIC_NAME, self.latency_ms as f64)
            .with_unit(MetricUnit::Milliseconds)
            .with_resolution(StorageResolution::Standard)
            .with_labels(identity.metric_dimensions())
            .with_timestamp(self.detected_at);

        if self.anomalous {
            metric.with_label(ANOMALY_LABEL, CLOCK_SKEW)
        } else {
            metric
        }
    }
}

/// Outcome of a successfully handled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// The emitted latency sample.
    pub sample: LatencySample,
    /// Where the refreshed chart was published.
    pub snapshot: PublishOutcome,
}

/// Turns expiration removals into latency samples and chart snapshots.
pub struct ExpirationDetector {
    metrics: Arc<dyn MetricStore>,
    renderer: Arc<dyn ChartRenderer>,
    publisher: SnapshotPublisher,
    identity: ExecutionIdentity,
    clock: Arc<dyn Clock>,
}

impl ExpirationDetector {
    /// Creates a new detector.
    ///
    /// # Arguments
    ///
    /// * `metrics` - Backend the latency samples are emitted to
    /// * `renderer` - Renders the latency chart
    /// * `publisher` - Writes the chart to the snapshot key
    /// * `identity` - Scopes the metric dimensions and the chart
    /// * `clock` - Time source for detection timestamps
    #[must_use]
    pub fn new(
        metrics: Arc<dyn MetricStore>,
        renderer: Arc<dyn ChartRenderer>,
        publisher: SnapshotPublisher,
        identity: ExecutionIdentity,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            metrics,
            renderer,
            publisher,
            identity,
            clock,
        }
    }

    /// Returns the identity the detector reports under.
    #[must_use]
    pub fn identity(&self) -> &ExecutionIdentity {
        &self.identity
    }

    /// Handles one change event.
    ///
    /// Steps run in order and stop at the first failure: validate, compute,
    /// emit, render, publish.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is not an expiration removal with a
    /// parseable key, or if any collaborator fails.
    pub fn handle(&self, event: &ChangeEvent) -> Result<Detection, DetectorError> {
        let created_at = event.validate()?;
        let detected_at = self.clock.now();
        let creation_key = event.creation_key().unwrap_or_default();
        let sample = LatencySample::between(creation_key, created_at, detected_at);

        if sample.anomalous {
            tracing::warn!(
                creation_key = %sample.creation_key,
                latency_ms = sample.latency_ms,
                "Creation key lies in the future, clock skew suspected"
            );
        }

        self.metrics
            .insert(sample.to_metric(&self.identity))
            .map_err(DetectorError::Metrics)?;

        let spec = ChartSpec::ttl_latency(&self.identity, detected_at);
        let chart = self.renderer.render(&spec)?;
        let snapshot = self.publisher.publish(&chart.image)?;

        tracing::info!(
            event_id = event.event_id.as_deref().unwrap_or("-"),
            creation_key = %sample.creation_key,
            latency_ms = sample.latency_ms,
            points = chart.points,
            key = %snapshot.key,
            size = snapshot.size,
            "Latency chart published"
        );

        Ok(Detection { sample, snapshot })
    }

    /// Parses a wire batch holding exactly one record and handles it.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed or holds more or less
    /// than one record, or if [`Self::handle`] fails.
    pub fn handle_batch(&self, payload: &str) -> Result<Detection, DetectorError> {
        let event = StreamBatch::from_json(payload)?.into_single_event()?;
        self.handle(&event)
    }
}
