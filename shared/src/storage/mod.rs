//! Storage traits and implementations.
//!
//! This module provides the contracts of the collaborators the probe talks to:
//! the probe store and its deletion feed, the metrics backend, and the object
//! store the rendered chart is published to. Each has an in-memory
//! implementation for development and testing.

pub mod metric_store;
pub mod object_store;
pub mod probe_store;

pub use metric_store::{
    AggregationFunction, ClickHouseMetricStore, InMemoryMetricStore, MetricQuery,
    MetricQueryResult, MetricStore, MetricStoreError, SeriesPoint,
};
pub use object_store::{
    FsObjectStore, InMemoryObjectStore, ObjectStore, ObjectStoreError, PublishOutcome,
    PutOutcome, SnapshotPublisher, StoredObject, PNG_CONTENT_TYPE, SNAPSHOT_KEY,
};
pub use probe_store::{
    DeletionFeed, ExpirationReaper, InMemoryProbeStore, ProbeStore, ProbeStoreError,
};
