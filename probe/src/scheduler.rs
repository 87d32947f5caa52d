//! Fixed-rate trigger for the record seeder.

use crate::seeder::RecordSeeder;
use std::sync::Arc;
use std::time::Duration;

/// Fires the seeder on a fixed interval.
pub struct ProbeScheduler {
    seeder: RecordSeeder,
    interval_duration: Duration,
}

impl ProbeScheduler {
    /// Creates a new scheduler.
    ///
    /// # Arguments
    ///
    /// * `seeder` - Seeder fired on every tick
    /// * `interval_duration` - Time between two ticks
    #[must_use]
    pub fn new(seeder: RecordSeeder, interval_duration: Duration) -> Self {
        Self {
            seeder,
            interval_duration,
        }
    }

    /// Starts the scheduling loop. The first tick fires immediately.
    ///
    /// This function runs until cancelled via the task handle. A failed tick
    /// is logged and the next one still fires.
    pub async fn run(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.interval_duration);

        loop {
            tick.tick().await;

            if let Err(e) = self.seeder.seed() {
                tracing::error!(error = %e, "Probe tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::clock::FixedClock;
    use shared::models::ProbeRecord;
    use shared::storage::{InMemoryProbeStore, ProbeStore, ProbeStoreError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFailStore {
        attempts: AtomicUsize,
    }

    impl ProbeStore for CountingFailStore {
        fn put(&self, _record: ProbeRecord) -> Result<(), ProbeStoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ProbeStoreError::StorageError("unreachable".to_string()))
        }

        fn count(&self) -> Result<usize, ProbeStoreError> {
            Ok(0)
        }
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_first_tick_seeds_immediately() {
        let store = Arc::new(InMemoryProbeStore::new());
        let scheduler = Arc::new(ProbeScheduler::new(
            RecordSeeder::new(store.clone(), clock()),
            Duration::from_secs(3600),
        ));

        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_ticks_do_not_stop_the_loop() {
        let store = Arc::new(CountingFailStore {
            attempts: AtomicUsize::new(0),
        });
        let scheduler = Arc::new(ProbeScheduler::new(
            RecordSeeder::new(store.clone(), clock()),
            Duration::from_millis(10),
        ));

        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(store.attempts.load(Ordering::SeqCst) >= 2);
    }
}
