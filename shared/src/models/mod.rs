//! Data models for the TTL probe.
//!
//! This module contains the probe record written by the seeder, the change
//! events emitted when records are removed, and the metric samples derived
//! from them.

pub mod change_event;
pub mod metric;
pub mod probe;

pub use change_event::{
    AttributeValue, ChangeEvent, DeletedKey, EventKind, EventValidationError, StreamBatch,
    StreamChange, StreamRecord, UserIdentity,
};
pub use metric::{Metric, MetricUnit, MetricValidationError, StorageResolution};
pub use probe::{format_creation_key, parse_creation_key, ProbeRecord};
