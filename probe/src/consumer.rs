//! Change-feed consumer.
//!
//! Pulls deletion events from a [`DeletionFeed`] one at a time and hands each
//! to the [`ExpirationDetector`]. A failed invocation is retried up to the
//! configured bound, after which the event is dropped so the feed keeps
//! moving.

use crate::detector::{Detection, DetectorError, ExpirationDetector};
use shared::models::ChangeEvent;
use shared::storage::DeletionFeed;
use std::sync::Arc;

/// Counters reported when the feed ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Events handled successfully.
    pub handled: u64,
    /// Events dropped after exhausting their invocations.
    pub dropped: u64,
    /// Total detector invocations, retries included.
    pub invocations: u64,
}

/// Result of processing one event.
#[derive(Debug)]
pub struct Processed {
    /// Detector invocations spent on the event.
    pub invocations: u32,
    /// The final outcome.
    pub outcome: Result<Detection, DetectorError>,
}

/// Drives the detector from the deletion feed.
pub struct ChangeFeedConsumer {
    detector: Arc<ExpirationDetector>,
    max_invocations: u32,
}

impl ChangeFeedConsumer {
    /// Creates a consumer allowing `retry_attempts` retries per event.
    #[must_use]
    pub fn new(detector: Arc<ExpirationDetector>, retry_attempts: u32) -> Self {
        Self {
            detector,
            max_invocations: retry_attempts.saturating_add(1),
        }
    }

    /// Total invocations an event may get.
    #[must_use]
    pub fn max_invocations(&self) -> u32 {
        self.max_invocations
    }

    /// Invokes the detector on `event` until it succeeds or the bound is hit.
    pub fn process(&self, event: &ChangeEvent) -> Processed {
        let mut invocations = 0;
        loop {
            invocations += 1;
            match self.detector.handle(event) {
                Ok(detection) => {
                    return Processed {
                        invocations,
                        outcome: Ok(detection),
                    }
                }
                Err(e) if invocations < self.max_invocations => {
                    tracing::warn!(
                        event_id = event.event_id.as_deref().unwrap_or("-"),
                        attempt = invocations,
                        error = %e,
                        "Detector invocation failed, retrying"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        event_id = event.event_id.as_deref().unwrap_or("-"),
                        creation_key = event.creation_key().unwrap_or("-"),
                        invocations,
                        error = %e,
                        "Dropping change event after exhausting retries"
                    );
                    return Processed {
                        invocations,
                        outcome: Err(e),
                    };
                }
            }
        }
    }

    /// Consumes `feed` until every sender is gone.
    pub async fn run(self: Arc<Self>, mut feed: DeletionFeed) -> ConsumerStats {
        let mut stats = ConsumerStats::default();

        while let Some(event) = feed.next().await {
            let processed = self.process(&event);
            stats.invocations += u64::from(processed.invocations);
            match processed.outcome {
                Ok(_) => stats.handled += 1,
                Err(_) => stats.dropped += 1,
            }
        }

        tracing::info!(
            handled = stats.handled,
            dropped = stats.dropped,
            "Deletion feed closed"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::chart::MetricStoreRenderer;
    use shared::clock::FixedClock;
    use shared::config::ExecutionIdentity;
    use shared::models::Metric;
    use shared::storage::{
        InMemoryMetricStore, InMemoryObjectStore, MetricQuery, MetricQueryResult, MetricStore,
        MetricStoreError, ObjectStore, ObjectStoreError, PutOutcome, SnapshotPublisher,
        StoredObject,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` inserts, then delegates.
    struct FlakyMetrics {
        inner: InMemoryMetricStore,
        failures: usize,
        attempts: AtomicUsize,
    }

    impl FlakyMetrics {
        fn new(failures: usize) -> Self {
            Self {
                inner: InMemoryMetricStore::new(),
                failures,
                attempts: AtomicUsize::new(0),
            }
        }
    }

    impl MetricStore for FlakyMetrics {
        fn insert(&self, metric: Metric) -> Result<(), MetricStoreError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(MetricStoreError::StorageError("unavailable".to_string()));
            }
            self.inner.insert(metric)
        }

        fn query(&self, query: MetricQuery) -> Result<MetricQueryResult, MetricStoreError> {
            self.inner.query(query)
        }

        fn count(&self) -> Result<usize, MetricStoreError> {
            self.inner.count()
        }

        fn clear(&self) -> Result<(), MetricStoreError> {
            self.inner.clear()
        }
    }

    /// Counts writes and rejects all of them.
    #[derive(Default)]
    struct RejectingObjects {
        puts: AtomicUsize,
    }

    impl ObjectStore for RejectingObjects {
        fn put_object(
            &self,
            _key: &str,
            _body: &[u8],
            _content_type: &str,
        ) -> Result<PutOutcome, ObjectStoreError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Err(ObjectStoreError::StorageError("access denied".to_string()))
        }

        fn get_object(&self, _key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
            Ok(None)
        }

        fn list_keys(&self) -> Result<Vec<String>, ObjectStoreError> {
            Ok(Vec::new())
        }
    }

    fn consumer(
        metrics: Arc<dyn MetricStore>,
        objects: Arc<dyn ObjectStore>,
        retry_attempts: u32,
    ) -> ChangeFeedConsumer {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
        let detector = ExpirationDetector::new(
            metrics.clone(),
            Arc::new(MetricStoreRenderer::new(metrics)),
            SnapshotPublisher::new(objects),
            ExecutionIdentity::default(),
            Arc::new(FixedClock::new(now)),
        );
        ChangeFeedConsumer::new(Arc::new(detector), retry_attempts)
    }

    fn expired() -> ChangeEvent {
        ChangeEvent::expired("2024-01-01T00:00:00.000000Z")
    }

    #[test]
    fn test_success_takes_one_invocation() {
        let consumer = consumer(
            InMemoryMetricStore::new_shared(),
            InMemoryObjectStore::new_shared(),
            1,
        );

        let processed = consumer.process(&expired());

        assert_eq!(processed.invocations, 1);
        assert_eq!(processed.outcome.unwrap().sample.latency_ms, 5_000);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let metrics = Arc::new(FlakyMetrics::new(1));
        let consumer = consumer(metrics.clone(), InMemoryObjectStore::new_shared(), 1);

        let processed = consumer.process(&expired());

        assert_eq!(processed.invocations, 2);
        assert!(processed.outcome.is_ok());
        assert_eq!(metrics.count().unwrap(), 1);
    }

    #[test]
    fn test_retries_are_bounded() {
        let metrics = Arc::new(FlakyMetrics::new(usize::MAX));
        let objects = InMemoryObjectStore::new_shared();
        let consumer = consumer(metrics.clone(), objects.clone(), 2);

        let processed = consumer.process(&expired());

        assert_eq!(processed.invocations, 3);
        assert!(matches!(processed.outcome, Err(DetectorError::Metrics(_))));
        assert_eq!(metrics.attempts.load(Ordering::SeqCst), 3);
        assert!(objects.list_keys().unwrap().is_empty());
    }

    #[test]
    fn test_publish_failure_is_retried_up_to_bound() {
        let metrics = InMemoryMetricStore::new_shared();
        let objects = Arc::new(RejectingObjects::default());
        let consumer = consumer(metrics.clone(), objects.clone(), 1);

        let processed = consumer.process(&expired());

        assert_eq!(processed.invocations, 2);
        assert!(matches!(processed.outcome, Err(DetectorError::Publish(_))));
        assert_eq!(objects.puts.load(Ordering::SeqCst), 2);
        // each invocation emits its sample before publishing fails
        assert_eq!(metrics.count().unwrap(), 2);
    }

    #[test]
    fn test_zero_retries_invokes_once() {
        let consumer = consumer(
            InMemoryMetricStore::new_shared(),
            InMemoryObjectStore::new_shared(),
            0,
        );

        let processed = consumer.process(&ChangeEvent::removed("2024-01-01T00:00:00.000000Z"));

        assert_eq!(consumer.max_invocations(), 1);
        assert_eq!(processed.invocations, 1);
        assert!(processed.outcome.is_err());
    }

    #[test]
    fn test_run_drains_feed_and_reports() {
        let metrics = InMemoryMetricStore::new_shared();
        let consumer = Arc::new(consumer(
            metrics.clone(),
            InMemoryObjectStore::new_shared(),
            1,
        ));
        let feed = DeletionFeed::from_events([
            expired(),
            ChangeEvent::removed("2024-01-01T00:00:00.000000Z"),
            ChangeEvent::expired("2024-01-01T00:00:01.000000Z"),
        ]);

        let stats = tokio_test::block_on(consumer.run(feed));

        assert_eq!(
            stats,
            ConsumerStats {
                handled: 2,
                dropped: 1,
                invocations: 4,
            }
        );
        let latest = metrics
            .query(MetricQuery::new().with_name("ttl-latency"))
            .unwrap();
        assert_eq!(latest.total_count, 2);
        assert_eq!(
            latest.metrics[0].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap()
        );
    }
}
