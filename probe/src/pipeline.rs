//! Probe pipeline wiring.
//!
//! Connects the seeder, the in-memory probe store and its reaper, the
//! deletion feed, and the detector with its collaborators. [`Pipeline::start`]
//! spawns the three background loops. The same detector also serves change
//! batches pushed by an external store through `POST /stream`.

use crate::consumer::{ChangeFeedConsumer, ConsumerStats};
use crate::detector::ExpirationDetector;
use crate::scheduler::ProbeScheduler;
use crate::seeder::RecordSeeder;
use shared::chart::MetricStoreRenderer;
use shared::clock::Clock;
use shared::config::{ExecutionIdentity, ProbeSettings};
use shared::storage::{
    DeletionFeed, ExpirationReaper, InMemoryProbeStore, MetricStore, ObjectStore,
    SnapshotPublisher,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The assembled, not yet running, probe.
pub struct Pipeline {
    settings: ProbeSettings,
    store: Arc<InMemoryProbeStore>,
    feed: DeletionFeed,
    seeder: RecordSeeder,
    reaper: Arc<ExpirationReaper>,
    detector: Arc<ExpirationDetector>,
    consumer: Arc<ChangeFeedConsumer>,
    publisher: SnapshotPublisher,
}

impl Pipeline {
    /// Wires a pipeline around the given collaborators.
    #[must_use]
    pub fn new(
        settings: ProbeSettings,
        identity: ExecutionIdentity,
        metrics: Arc<dyn MetricStore>,
        objects: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (store, feed) = InMemoryProbeStore::with_feed();
        let store = Arc::new(store);
        let publisher = SnapshotPublisher::new(objects);

        let detector = Arc::new(ExpirationDetector::new(
            metrics.clone(),
            Arc::new(MetricStoreRenderer::new(metrics)),
            publisher.clone(),
            identity,
            clock.clone(),
        ));

        Self {
            seeder: RecordSeeder::new(store.clone(), clock.clone()),
            reaper: Arc::new(ExpirationReaper::new(
                store.clone(),
                clock,
                settings.sweep_interval(),
            )),
            consumer: Arc::new(ChangeFeedConsumer::new(
                detector.clone(),
                settings.retry_attempts,
            )),
            detector,
            settings,
            store,
            feed,
            publisher,
        }
    }

    /// Returns the publisher the detector writes snapshots through.
    #[must_use]
    pub fn publisher(&self) -> SnapshotPublisher {
        self.publisher.clone()
    }

    /// Returns the detector shared by the feed consumer and the ingest route.
    #[must_use]
    pub fn detector(&self) -> Arc<ExpirationDetector> {
        self.detector.clone()
    }

    /// Returns the probe store.
    #[must_use]
    pub fn probe_store(&self) -> Arc<InMemoryProbeStore> {
        self.store.clone()
    }

    /// Returns the seeder.
    #[must_use]
    pub fn seeder(&self) -> &RecordSeeder {
        &self.seeder
    }

    /// Returns the expiration reaper.
    #[must_use]
    pub fn reaper(&self) -> &ExpirationReaper {
        &self.reaper
    }

    /// Processes every event already queued on the feed, without waiting.
    pub fn drain(&mut self) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        while let Some(event) = self.feed.try_next() {
            let processed = self.consumer.process(&event);
            stats.invocations += u64::from(processed.invocations);
            match processed.outcome {
                Ok(_) => stats.handled += 1,
                Err(_) => stats.dropped += 1,
            }
        }
        stats
    }

    /// Spawns the scheduler, reaper and consumer loops.
    #[must_use]
    pub fn start(self) -> PipelineHandle {
        tracing::info!(
            probe_interval_secs = self.settings.probe_interval_secs,
            sweep_interval_secs = self.settings.sweep_interval_secs,
            retry_attempts = self.settings.retry_attempts,
            "Starting probe pipeline"
        );

        let scheduler = Arc::new(ProbeScheduler::new(
            self.seeder,
            self.settings.probe_interval(),
        ));

        PipelineHandle {
            scheduler: tokio::spawn(scheduler.run()),
            reaper: tokio::spawn(self.reaper.run()),
            consumer: tokio::spawn(self.consumer.run(self.feed)),
        }
    }
}

/// Handles of the running background loops.
pub struct PipelineHandle {
    scheduler: JoinHandle<()>,
    reaper: JoinHandle<()>,
    consumer: JoinHandle<ConsumerStats>,
}

impl PipelineHandle {
    /// Stops every loop.
    pub fn shutdown(self) {
        self.scheduler.abort();
        self.reaper.abort();
        self.consumer.abort();
        tracing::info!("Probe pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use shared::clock::FixedClock;
    use shared::storage::{InMemoryMetricStore, InMemoryObjectStore, MetricQuery, ProbeStore};

    fn pipeline(clock: Arc<FixedClock>) -> (Pipeline, Arc<InMemoryMetricStore>) {
        let metrics = InMemoryMetricStore::new_shared();
        let pipeline = Pipeline::new(
            ProbeSettings::default(),
            ExecutionIdentity::default(),
            metrics.clone(),
            InMemoryObjectStore::new_shared(),
            clock,
        );
        (pipeline, metrics)
    }

    #[test]
    fn test_seed_sweep_drain_records_latency() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let (mut pipeline, metrics) = pipeline(clock.clone());

        pipeline.seeder().seed().unwrap();
        clock.advance(Duration::seconds(5));
        assert_eq!(pipeline.reaper().sweep_once().unwrap(), 1);

        let stats = pipeline.drain();

        assert_eq!(stats.handled, 1);
        let samples = metrics
            .query(MetricQuery::new().with_name("ttl-latency"))
            .unwrap();
        assert!((samples.metrics[0].value - 5_000.0).abs() < f64::EPSILON);
        assert!(pipeline.publisher().latest().unwrap().is_some());
    }

    #[test]
    fn test_explicit_delete_is_not_measured() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let (mut pipeline, metrics) = pipeline(clock);

        let record = pipeline.seeder().seed().unwrap();
        pipeline.probe_store().delete(&record.creation_key).unwrap();

        let stats = pipeline.drain();

        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.invocations, 2);
        assert_eq!(metrics.count().unwrap(), 0);
        assert!(pipeline.publisher().latest().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_started_pipeline_publishes_snapshot() {
        let metrics = InMemoryMetricStore::new_shared();
        let pipeline = Pipeline::new(
            ProbeSettings::new(3600, 1, 1),
            ExecutionIdentity::default(),
            metrics.clone(),
            InMemoryObjectStore::new_shared(),
            Arc::new(shared::clock::SystemClock),
        );
        let publisher = pipeline.publisher();
        let store = pipeline.probe_store();

        let handle = pipeline.start();
        // one seed fires immediately, the reaper sweeps it within a second
        for _ in 0..40 {
            if publisher.latest().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        handle.shutdown();

        assert!(publisher.latest().unwrap().is_some());
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(metrics.count().unwrap(), 1);
    }
}
