//! Probe record storage, expiration sweep and deletion feed.
//!
//! The `ProbeStore` trait is the write side of the store the seeder talks to.
//! `InMemoryProbeStore` honours the TTL attribute through an explicit
//! [`InMemoryProbeStore::sweep`], which `ExpirationReaper` drives on an
//! interval, and reports every removal on a [`DeletionFeed`].

use crate::clock::Clock;
use crate::models::{ChangeEvent, ProbeRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur during probe store operations.
#[derive(Debug, Error)]
pub enum ProbeStoreError {
    /// Failed to acquire lock on the store.
    #[error("Failed to acquire lock on probe store")]
    LockError,

    /// The write was rejected.
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// Generic storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Trait for stores that accept probe records.
pub trait ProbeStore: Send + Sync {
    /// Writes a probe record.
    ///
    /// A record written with an existing key replaces the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&self, record: ProbeRecord) -> Result<(), ProbeStoreError>;

    /// Returns the number of records currently held.
    ///
    /// # Errors
    ///
    /// Returns an error if the count operation fails.
    fn count(&self) -> Result<usize, ProbeStoreError>;
}

/// Lazy, unbounded sequence of removal events, consumed one at a time.
#[derive(Debug)]
pub struct DeletionFeed {
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl DeletionFeed {
    /// Creates a connected sender/feed pair.
    #[must_use]
    pub fn channel() -> (mpsc::UnboundedSender<ChangeEvent>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self { receiver })
    }

    /// Creates a finite feed that yields the given events and then ends.
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = ChangeEvent>) -> Self {
        let (sender, feed) = Self::channel();
        for event in events {
            // The receiver is alive in `feed`, so sending cannot fail.
            let _ = sender.send(event);
        }
        feed
    }

    /// Waits for the next event. Returns `None` once every producer is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

/// In-memory probe store with TTL semantics.
#[derive(Debug, Default)]
pub struct InMemoryProbeStore {
    records: RwLock<BTreeMap<String, ProbeRecord>>,
    feed: Option<mpsc::UnboundedSender<ChangeEvent>>,
    sequence: AtomicU64,
}

impl InMemoryProbeStore {
    /// Creates a store that does not publish removals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store together with the feed its removals are published on.
    #[must_use]
    pub fn with_feed() -> (Self, DeletionFeed) {
        let (sender, feed) = DeletionFeed::channel();
        let store = Self {
            feed: Some(sender),
            ..Self::default()
        };
        (store, feed)
    }

    /// Returns true if a record with the given key is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn contains(&self, creation_key: &str) -> Result<bool, ProbeStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| ProbeStoreError::LockError)?;
        Ok(records.contains_key(creation_key))
    }

    /// Explicitly deletes a record, publishing a non-expiration removal.
    ///
    /// Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn delete(&self, creation_key: &str) -> Result<bool, ProbeStoreError> {
        let removed = {
            let mut records = self
                .records
                .write()
                .map_err(|_| ProbeStoreError::LockError)?;
            records.remove(creation_key)
        };

        if let Some(record) = removed {
            self.publish(ChangeEvent::removed(record.creation_key));
            return Ok(true);
        }
        Ok(false)
    }

    /// Removes every record whose expiration is due at `now`.
    ///
    /// Each removal is published as an expiration event, oldest key first.
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, ProbeStoreError> {
        let expired: Vec<ProbeRecord> = {
            let mut records = self
                .records
                .write()
                .map_err(|_| ProbeStoreError::LockError)?;
            let keys: Vec<String> = records
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.creation_key.clone())
                .collect();
            keys.iter().filter_map(|k| records.remove(k)).collect()
        };

        for record in &expired {
            self.publish(ChangeEvent::expired(record.creation_key.clone()));
        }
        Ok(expired.len())
    }

    fn publish(&self, event: ChangeEvent) {
        let Some(sender) = &self.feed else {
            return;
        };

        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let event = event.with_event_id(format!("{id:032x}"));
        if sender.send(event).is_err() {
            tracing::debug!("Deletion feed closed, dropping removal event");
        }
    }
}

impl ProbeStore for InMemoryProbeStore {
    fn put(&self, record: ProbeRecord) -> Result<(), ProbeStoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ProbeStoreError::LockError)?;
        records.insert(record.creation_key.clone(), record);
        Ok(())
    }

    fn count(&self) -> Result<usize, ProbeStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| ProbeStoreError::LockError)?;
        Ok(records.len())
    }
}

/// Background sweep that expires records of an [`InMemoryProbeStore`].
pub struct ExpirationReaper {
    store: Arc<InMemoryProbeStore>,
    clock: Arc<dyn Clock>,
    interval_duration: Duration,
}

impl ExpirationReaper {
    /// Creates a new reaper.
    ///
    /// # Arguments
    ///
    /// * `store` - Store to sweep
    /// * `clock` - Time source deciding what is expired
    /// * `interval_duration` - How often to sweep
    #[must_use]
    pub fn new(
        store: Arc<InMemoryProbeStore>,
        clock: Arc<dyn Clock>,
        interval_duration: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            interval_duration,
        }
    }

    /// Runs one sweep at the clock's current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be swept.
    pub fn sweep_once(&self) -> Result<usize, ProbeStoreError> {
        self.store.sweep(self.clock.now())
    }

    /// Starts the sweep loop.
    ///
    /// This function runs until cancelled via the task handle.
    pub async fn run(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.interval_duration);

        loop {
            tick.tick().await;

            match self.sweep_once() {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Expired probe records swept"),
                Err(e) => tracing::error!(error = %e, "Failed to sweep expired probe records"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::EventKind;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_put_and_count() {
        let store = InMemoryProbeStore::new();
        store.put(ProbeRecord::at(start())).unwrap();
        store
            .put(ProbeRecord::at(start() + ChronoDuration::seconds(60)))
            .unwrap();

        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_colliding_key_overwrites() {
        let store = InMemoryProbeStore::new();
        store.put(ProbeRecord::at(start())).unwrap();
        store.put(ProbeRecord::at(start())).unwrap();

        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_sweep_removes_only_expired_and_publishes() {
        let (store, mut feed) = InMemoryProbeStore::with_feed();
        let first = ProbeRecord::at(start());
        let later = ProbeRecord::at(start() + ChronoDuration::seconds(120));
        store.put(first.clone()).unwrap();
        store.put(later.clone()).unwrap();

        let removed = store.sweep(start() + ChronoDuration::seconds(5)).unwrap();

        assert_eq!(removed, 1);
        assert!(!store.contains(&first.creation_key).unwrap());
        assert!(store.contains(&later.creation_key).unwrap());

        let event = feed.try_next().unwrap();
        assert_eq!(event.event_kind, EventKind::ExpiredRemoval);
        assert_eq!(event.creation_key(), Some(first.creation_key.as_str()));
        assert!(event.event_id.is_some());
        assert!(feed.try_next().is_none());
    }

    #[test]
    fn test_explicit_delete_publishes_other_removal() {
        let (store, mut feed) = InMemoryProbeStore::with_feed();
        let record = ProbeRecord::at(start());
        store.put(record.clone()).unwrap();

        assert!(store.delete(&record.creation_key).unwrap());
        assert!(!store.delete(&record.creation_key).unwrap());

        let event = feed.try_next().unwrap();
        assert_eq!(event.event_kind, EventKind::OtherRemoval);
        assert!(feed.try_next().is_none());
    }

    #[test]
    fn test_sweep_without_feed_still_removes() {
        let store = InMemoryProbeStore::new();
        store.put(ProbeRecord::at(start())).unwrap();

        assert_eq!(store.sweep(start()).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_sweep_after_feed_dropped_does_not_fail() {
        let (store, feed) = InMemoryProbeStore::with_feed();
        drop(feed);
        store.put(ProbeRecord::at(start())).unwrap();

        assert_eq!(store.sweep(start()).unwrap(), 1);
    }

    #[test]
    fn test_feed_from_events_ends_after_last_event() {
        let mut feed = DeletionFeed::from_events(vec![
            ChangeEvent::expired("2024-01-01T00:00:00Z"),
            ChangeEvent::removed("2024-01-01T00:01:00Z"),
        ]);

        tokio_test::block_on(async {
            assert_eq!(
                feed.next().await.map(|e| e.event_kind),
                Some(EventKind::ExpiredRemoval)
            );
            assert_eq!(
                feed.next().await.map(|e| e.event_kind),
                Some(EventKind::OtherRemoval)
            );
            assert!(feed.next().await.is_none());
        });
    }

    #[test]
    fn test_reaper_sweep_once_uses_clock() {
        let (store, mut feed) = InMemoryProbeStore::with_feed();
        let store = Arc::new(store);
        let clock = Arc::new(FixedClock::new(start() - ChronoDuration::seconds(10)));
        store.put(ProbeRecord::at(start())).unwrap();

        let reaper = ExpirationReaper::new(
            Arc::clone(&store),
            clock.clone(),
            Duration::from_secs(15),
        );

        assert_eq!(reaper.sweep_once().unwrap(), 0);
        clock.set(start());
        assert_eq!(reaper.sweep_once().unwrap(), 1);
        assert!(feed.try_next().is_some());
    }

    #[tokio::test]
    async fn test_reaper_run_sweeps_on_interval() {
        let (store, mut feed) = InMemoryProbeStore::with_feed();
        let store = Arc::new(store);
        store.put(ProbeRecord::at(start())).unwrap();
        let clock = Arc::new(FixedClock::new(start()));

        let reaper = Arc::new(ExpirationReaper::new(
            Arc::clone(&store),
            clock,
            Duration::from_secs(15),
        ));
        let handle = tokio::spawn(reaper.run());

        let event = feed.next().await.unwrap();
        assert_eq!(event.event_kind, EventKind::ExpiredRemoval);

        handle.abort();
    }
}
