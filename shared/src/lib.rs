//! TTL Probe Shared Library
//!
//! This crate contains the types and collaborator contracts used by the TTL
//! latency probe: the probe record the seeder writes, the change events the
//! store emits when records disappear, the metric samples derived from them,
//! and the chart that visualizes the latency series.
//!
//! # Modules
//!
//! - [`models`] - Probe records, change events and metric samples
//! - [`storage`] - Probe store, metrics backend and object store contracts
//! - [`chart`] - Chart specification and rendering
//! - [`config`] - Execution identity and probe settings
//! - [`clock`] - Wall-clock seam
//!
//! # Example
//!
//! ```
//! use shared::models::{ChangeEvent, EventKind};
//!
//! let event = ChangeEvent::expired("2024-01-01T00:00:00.000000Z");
//! assert_eq!(event.event_kind, EventKind::ExpiredRemoval);
//! assert_eq!(event.validate().unwrap().timestamp(), 1_704_067_200);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod chart;
pub mod clock;
pub mod config;
pub mod models;
pub mod storage;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
