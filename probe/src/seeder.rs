//! Record seeder.
//!
//! Writes one probe record per tick. The record's key is the current time and
//! its expiration is the same instant, so the store may reap it at once.

use shared::clock::Clock;
use shared::models::ProbeRecord;
use shared::storage::{ProbeStore, ProbeStoreError};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the seeder.
#[derive(Debug, Error)]
pub enum SeederError {
    /// The store rejected or failed the write.
    #[error("Failed to write probe record '{key}': {source}")]
    Write {
        /// Key of the record that could not be written.
        key: String,
        /// Underlying store failure.
        source: ProbeStoreError,
    },
}

/// Seeds probe records into a store.
#[derive(Clone)]
pub struct RecordSeeder {
    store: Arc<dyn ProbeStore>,
    clock: Arc<dyn Clock>,
}

impl RecordSeeder {
    /// Creates a seeder writing to `store` with timestamps from `clock`.
    #[must_use]
    pub fn new(store: Arc<dyn ProbeStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Writes exactly one probe record stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails. The write is not retried.
    pub fn seed(&self) -> Result<ProbeRecord, SeederError> {
        let record = ProbeRecord::at(self.clock.now());

        self.store
            .put(record.clone())
            .map_err(|source| SeederError::Write {
                key: record.creation_key.clone(),
                source,
            })?;

        tracing::info!(
            creation_key = %record.creation_key,
            expires_at = record.expires_at,
            "Probe record seeded"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use shared::clock::FixedClock;
    use shared::storage::InMemoryProbeStore;

    struct RejectingStore;

    impl ProbeStore for RejectingStore {
        fn put(&self, _record: ProbeRecord) -> Result<(), ProbeStoreError> {
            Err(ProbeStoreError::WriteRejected("throttled".to_string()))
        }

        fn count(&self) -> Result<usize, ProbeStoreError> {
            Ok(0)
        }
    }

    #[test]
    fn test_seed_writes_one_record_keyed_by_now() {
        let store = Arc::new(InMemoryProbeStore::new());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let seeder = RecordSeeder::new(store.clone(), Arc::new(FixedClock::new(now)));

        let record = seeder.seed().unwrap();

        assert_eq!(record.creation_key, "2024-01-01T00:00:00.000000Z");
        assert_eq!(record.expires_at, 1_704_067_200);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.contains(&record.creation_key).unwrap());
    }

    #[test]
    fn test_successive_seeds_write_distinct_records() {
        let store = Arc::new(InMemoryProbeStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let seeder = RecordSeeder::new(store.clone(), clock.clone());

        let first = seeder.seed().unwrap();
        clock.advance(Duration::seconds(60));
        let second = seeder.seed().unwrap();

        assert_ne!(first.creation_key, second.creation_key);
        assert_eq!(second.expires_at - first.expires_at, 60);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_write_failure_is_propagated() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let seeder = RecordSeeder::new(Arc::new(RejectingStore), Arc::new(FixedClock::new(now)));

        let result = seeder.seed();

        assert!(matches!(
            result,
            Err(SeederError::Write { ref key, .. }) if key == "2024-01-01T00:00:00.000000Z"
        ));
    }
}
